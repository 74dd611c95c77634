use log::{debug, warn};
use ndarray::Axis;
use thiserror::Error;

use crate::cache::{CacheError, LruCache};
use crate::chunk::{Chunk, ChunkFull};
use crate::compress::{self, CompressError, SampleCompression};
use crate::data_type::{NBytes, ReflectedType};
use crate::encode::chunk_id::{name_from_id, ChunkIdEncoder};
use crate::index::{Index, IndexError};
use crate::keys;
use crate::meta::{MetaError, TensorMeta};
use crate::sample::{Sample, SampleBuf};
use crate::store::{Store, StoreError};
use crate::{shape_numel, ArcArrayD};

pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 32 * 1024 * 1024;

const COMPRESSION_HINT: &str = "; consider enabling sample compression";

#[derive(Error, Debug)]
pub enum ChunkEngineError {
    #[error("max_chunk_size must be greater than 2, got {0}")]
    Config(u64),
    #[error("tensor `{0}` already exists")]
    AlreadyExists(String),
    #[error("tensor meta for `{key}` reports {length} samples but the chunk id encoder is missing")]
    CorruptedMeta { key: String, length: u64 },
    #[error(transparent)]
    IncompatibleSample(#[from] MetaError),
    #[error("sample of {nbytes} bytes exceeds the {max} byte per-sample limit{hint}")]
    SampleTooLarge {
        nbytes: u64,
        max: u64,
        hint: &'static str,
    },
    #[error("samples have differing shapes {first:?} and {other:?}; read them as a list instead")]
    DynamicShape { first: Vec<usize>, other: Vec<usize> },
    #[error("extending requires a batch with a leading sample axis, got a {0}-dimensional array")]
    BatchDims(usize),
    #[error("sample {0} spans multiple chunks, which reads do not support")]
    SpanningSample(u64),
    #[error("no chunk at position {0}")]
    NoSuchChunk(isize),
    #[error("chunk bookkeeping is inconsistent: {0}")]
    Inconsistent(&'static str),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Compress(#[from] CompressError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    ChunkFull(#[from] ChunkFull),
}

/// Packs samples into size-bounded chunks behind an [LruCache] and finds
/// them again.
///
/// One engine drives one tensor. The tensor's meta, its chunk id encoder
/// and every chunk are cache-backed; the engine resolves them at operation
/// entry, mutates them in memory, writes them back and then hands control
/// to the cache with `maybe_flush`. It never evicts anything itself.
///
/// Engines are single-threaded; sharing one across workers needs external
/// synchronization.
#[derive(Debug)]
pub struct ChunkEngine<S: Store> {
    key: String,
    cache: LruCache<S>,
    max_chunk_size: u64,
    min_chunk_size_target: u64,
}

impl<S: Store> ChunkEngine<S> {
    /// Set up a fresh tensor under `key`.
    pub fn create(
        key: &str,
        cache: LruCache<S>,
        max_chunk_size: u64,
        compression: SampleCompression,
    ) -> Result<Self, ChunkEngineError> {
        let engine = Self::construct(key, cache, max_chunk_size)?;
        let meta_key = keys::tensor_meta_key(&engine.key);
        if engine.cache.contains(&meta_key)? {
            return Err(ChunkEngineError::AlreadyExists(engine.key));
        }
        engine.cache.put_cachable(&meta_key, &TensorMeta::new(compression));
        engine.cache.put_cachable(
            &keys::chunk_id_encoder_key(&engine.key),
            &ChunkIdEncoder::new(),
        );
        engine.cache.maybe_flush()?;
        Ok(engine)
    }

    /// Open an existing tensor.
    ///
    /// A meta that counts more samples than the chunk id encoder holds is
    /// trimmed down to agree with it, so a write that died between the two
    /// cannot leave dangling samples.
    pub fn open(
        key: &str,
        cache: LruCache<S>,
        max_chunk_size: u64,
    ) -> Result<Self, ChunkEngineError> {
        let engine = Self::construct(key, cache, max_chunk_size)?;
        let mut meta = engine.tensor_meta()?;
        let enc = engine.chunk_id_encoder_with(&meta)?;
        if meta.length > enc.num_samples() {
            warn!(
                "tensor `{}`: trimming length {} to the {} samples the chunk id encoder holds",
                engine.key,
                meta.length,
                enc.num_samples()
            );
            meta.length = enc.num_samples();
            engine
                .cache
                .put_cachable(&keys::tensor_meta_key(&engine.key), &meta);
        }
        Ok(engine)
    }

    fn construct(
        key: &str,
        cache: LruCache<S>,
        max_chunk_size: u64,
    ) -> Result<Self, ChunkEngineError> {
        if max_chunk_size <= 2 {
            return Err(ChunkEngineError::Config(max_chunk_size));
        }
        Ok(Self {
            key: key.to_owned(),
            cache,
            max_chunk_size,
            min_chunk_size_target: max_chunk_size / 2,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn max_chunk_size(&self) -> u64 {
        self.max_chunk_size
    }

    /// Chunks below this size still take further appends.
    pub fn min_chunk_size_target(&self) -> u64 {
        self.min_chunk_size_target
    }

    pub fn cache(&self) -> &LruCache<S> {
        &self.cache
    }

    pub fn into_cache(self) -> LruCache<S> {
        self.cache
    }

    pub fn tensor_meta(&self) -> Result<TensorMeta, ChunkEngineError> {
        Ok(self.cache.get_cachable(&keys::tensor_meta_key(&self.key))?)
    }

    pub fn chunk_id_encoder(&self) -> Result<ChunkIdEncoder, ChunkEngineError> {
        let meta = self.tensor_meta()?;
        self.chunk_id_encoder_with(&meta)
    }

    fn chunk_id_encoder_with(&self, meta: &TensorMeta) -> Result<ChunkIdEncoder, ChunkEngineError> {
        match self
            .cache
            .get_cachable(&keys::chunk_id_encoder_key(&self.key))
        {
            Ok(enc) => Ok(enc),
            Err(CacheError::Store(StoreError::NotFound(_))) => {
                if meta.length > 0 {
                    Err(ChunkEngineError::CorruptedMeta {
                        key: self.key.clone(),
                        length: meta.length,
                    })
                } else {
                    Ok(ChunkIdEncoder::new())
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn num_samples(&self) -> Result<u64, ChunkEngineError> {
        Ok(self.tensor_meta()?.length)
    }

    pub fn num_chunks(&self) -> Result<u64, ChunkEngineError> {
        Ok(self.chunk_id_encoder()?.num_chunks())
    }

    /// Chunk at a row of the id encoder; negative positions count from the
    /// end.
    pub fn chunk(&self, i: isize) -> Result<Chunk, ChunkEngineError> {
        let enc = self.chunk_id_encoder()?;
        let name = enc
            .get_name_for_chunk(i)
            .ok_or(ChunkEngineError::NoSuchChunk(i))?;
        Ok(self.cache.get_cachable(&keys::chunk_key(&self.key, &name))?)
    }

    /// Persist everything dirty in the cache.
    pub fn flush(&self) -> Result<(), ChunkEngineError> {
        Ok(self.cache.flush()?)
    }

    // --- write path ---

    /// Append one sample.
    pub fn append<T: ReflectedType>(&mut self, sample: Sample<T>) -> Result<(), ChunkEngineError> {
        let meta = self.tensor_meta()?;
        let buf = sample.normalize(meta.sample_compression)?;
        self.append_buf(buf)?;
        self.cache.maybe_flush()?;
        Ok(())
    }

    /// Append every sample along the leading axis of a uniform batch.
    ///
    /// All samples are serialized and validated before anything is
    /// written, so one bad sample anywhere aborts the whole batch with
    /// the store untouched.
    pub fn extend<T: ReflectedType>(
        &mut self,
        batch: ArcArrayD<T>,
    ) -> Result<(), ChunkEngineError> {
        if batch.ndim() < 2 {
            return Err(ChunkEngineError::BatchDims(batch.ndim()));
        }
        let meta = self.tensor_meta()?;
        let mut scratch = meta.clone();
        let mut bufs = Vec::with_capacity(batch.len_of(Axis(0)));
        for sub in batch.outer_iter() {
            let buf =
                Sample::Array(sub.to_owned().into_shared()).normalize(meta.sample_compression)?;
            self.check_sample_size(&buf, &scratch)?;
            scratch.check_compatibility(&buf.shape, buf.dtype)?;
            scratch.update(&buf.shape, buf.dtype, 1);
            bufs.push(buf);
        }
        for buf in bufs {
            self.append_buf(buf)?;
        }
        self.cache.maybe_flush()?;
        Ok(())
    }

    /// Append a sequence of samples one by one.
    ///
    /// Unlike [ChunkEngine::extend] this commits a prefix when a later
    /// sample fails; the committed prefix stays readable and consistent.
    pub fn extend_samples<T: ReflectedType, I>(&mut self, samples: I) -> Result<(), ChunkEngineError>
    where
        I: IntoIterator<Item = Sample<T>>,
    {
        let compression = self.tensor_meta()?.sample_compression;
        for sample in samples {
            let buf = sample.normalize(compression)?;
            self.append_buf(buf)?;
        }
        self.cache.maybe_flush()?;
        Ok(())
    }

    fn append_buf(&mut self, buf: SampleBuf) -> Result<(), ChunkEngineError> {
        let mut meta = self.tensor_meta()?;
        self.check_sample_size(&buf, &meta)?;
        meta.check_compatibility(&buf.shape, buf.dtype)?;
        // metadata lands before data: a crash mid-write leaves at most
        // orphaned bytes, never dangling metadata
        meta.update(&buf.shape, buf.dtype, 1);
        self.cache
            .put_cachable(&keys::tensor_meta_key(&self.key), &meta);

        let mut enc = self.chunk_id_encoder_with(&meta)?;
        self.append_bytes(&mut enc, &buf)?;
        self.cache
            .put_cachable(&keys::chunk_id_encoder_key(&self.key), &enc);
        Ok(())
    }

    // todo: lift the per-sample size limit by letting a sample span
    // chunks via ChunkIdEncoder::register_connection_to_last_chunk_id
    fn check_sample_size(
        &self,
        buf: &SampleBuf,
        meta: &TensorMeta,
    ) -> Result<(), ChunkEngineError> {
        if buf.nbytes() > self.min_chunk_size_target {
            let hint = if meta.sample_compression == SampleCompression::Uncompressed {
                COMPRESSION_HINT
            } else {
                ""
            };
            return Err(ChunkEngineError::SampleTooLarge {
                nbytes: buf.nbytes(),
                max: self.min_chunk_size_target,
                hint,
            });
        }
        Ok(())
    }

    /// Write one sample's payload into the last chunk if that keeps the
    /// total chunk count optimal, else into a fresh chunk.
    fn append_bytes(
        &self,
        enc: &mut ChunkIdEncoder,
        buf: &SampleBuf,
    ) -> Result<(), ChunkEngineError> {
        let nbytes = buf.nbytes();
        let reuse = match self.last_chunk(enc)? {
            Some((name, chunk)) if self.fits_in_last_chunk(&chunk, nbytes) => Some((name, chunk)),
            _ => None,
        };
        let (name, mut chunk) = match reuse {
            Some(pair) => pair,
            None => {
                let id = enc.generate_chunk_id();
                debug!("tensor `{}`: starting chunk {}", self.key, name_from_id(id));
                (name_from_id(id), Chunk::new())
            }
        };
        chunk.append_sample(&buf.data, self.max_chunk_size)?;
        chunk.update_headers(nbytes, 1, &buf.shape);
        enc.register_samples_to_last_chunk_id(1);
        self.cache
            .put_cachable(&keys::chunk_key(&self.key, &name), &chunk);
        Ok(())
    }

    fn last_chunk(&self, enc: &ChunkIdEncoder) -> Result<Option<(String, Chunk)>, ChunkEngineError> {
        match enc.get_name_for_chunk(-1) {
            None => Ok(None),
            Some(name) => {
                let chunk = self.cache.get_cachable(&keys::chunk_key(&self.key, &name))?;
                Ok(Some((name, chunk)))
            }
        }
    }

    fn fits_in_last_chunk(&self, chunk: &Chunk, sample_nbytes: u64) -> bool {
        if !chunk.is_under_min_space(self.min_chunk_size_target) {
            return false;
        }
        if sample_nbytes == 0 {
            return true;
        }
        // appending may not force more chunks than the sample would take alone
        let ct_alone = self.min_chunk_ct_for_data_size(sample_nbytes);
        let ct_combined =
            self.min_chunk_ct_for_data_size(sample_nbytes + chunk.num_data_bytes());
        ct_combined == ct_alone
    }

    fn min_chunk_ct_for_data_size(&self, nbytes: u64) -> u64 {
        (nbytes + self.max_chunk_size - 1) / self.max_chunk_size
    }

    // --- read path ---

    /// Samples selected by the index, one array each.
    pub fn read_list<T: ReflectedType>(
        &self,
        index: &Index,
    ) -> Result<Vec<ArcArrayD<T>>, ChunkEngineError> {
        let (samples, _) = self.read_samples::<T>(index)?;
        let applied = index.apply(samples)?;
        Ok(index.apply_squeeze(applied))
    }

    /// Samples selected by the index, stacked on a leading axis.
    ///
    /// Requires every selected sample to have the same shape.
    pub fn read_array<T: ReflectedType>(
        &self,
        index: &Index,
    ) -> Result<ArcArrayD<T>, ChunkEngineError> {
        let (samples, meta) = self.read_samples::<T>(index)?;
        if let Some((first, rest)) = samples.split_first() {
            for s in rest {
                if s.shape() != first.shape() {
                    return Err(ChunkEngineError::DynamicShape {
                        first: first.shape().to_vec(),
                        other: s.shape().to_vec(),
                    });
                }
            }
        }
        let applied = index.apply(samples)?;
        let stacked = if applied.is_empty() {
            // keep the tensor's per-sample rank even with nothing selected;
            // wildcard dims have no fixed size, and zero keeps the array empty
            let mut dims = vec![0usize];
            if let Some(constraint) = &meta.sample_shape {
                dims.extend(constraint.iter().map(|d| d.unwrap_or(0) as usize));
            }
            ndarray::ArrayD::from_shape_vec(ndarray::IxDyn(&dims), Vec::new())
                .expect("empty array")
                .into_shared()
        } else {
            let views: Vec<_> = applied.iter().map(|a| a.view()).collect();
            ndarray::stack(Axis(0), &views)
                .map_err(|_| ChunkEngineError::Inconsistent("could not stack equal-shape samples"))?
                .into_shared()
        };
        Ok(index.apply_squeeze_stacked(stacked))
    }

    fn read_samples<T: ReflectedType>(
        &self,
        index: &Index,
    ) -> Result<(Vec<ArcArrayD<T>>, TensorMeta), ChunkEngineError> {
        let meta = self.tensor_meta()?;
        if let Some(expected) = meta.dtype {
            if expected != T::DATA_TYPE {
                return Err(MetaError::Dtype {
                    expected,
                    got: T::DATA_TYPE,
                }
                .into());
            }
        }
        let enc = self.chunk_id_encoder_with(&meta)?;
        let samples = index
            .sample_entry()
            .indices(meta.length)?
            .into_iter()
            .map(|g| self.read_sample::<T>(g, &enc, &meta))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((samples, meta))
    }

    fn read_sample<T: ReflectedType>(
        &self,
        g: u64,
        enc: &ChunkIdEncoder,
        meta: &TensorMeta,
    ) -> Result<ArcArrayD<T>, ChunkEngineError> {
        let ids = enc
            .chunk_ids(g)
            .ok_or(ChunkEngineError::Inconsistent(
                "sample missing from the chunk id encoder",
            ))?;
        if ids.len() > 1 {
            return Err(ChunkEngineError::SpanningSample(g));
        }
        let chunk: Chunk = self
            .cache
            .get_cachable(&keys::chunk_key(&self.key, &name_from_id(ids[0])))?;
        let local = enc
            .get_local_sample_index(g)
            .ok_or(ChunkEngineError::Inconsistent("no local index for sample"))?;
        let shape = chunk
            .shape(local)
            .ok_or(ChunkEngineError::Inconsistent("missing shape header"))?
            .clone();
        let range = chunk
            .byte_range(local)
            .ok_or(ChunkEngineError::Inconsistent("missing byte range header"))?;
        let raw = chunk
            .data()
            .get(range.start as usize..range.end as usize)
            .ok_or(ChunkEngineError::Inconsistent(
                "byte range reaches past the chunk payload",
            ))?;
        let decoded = match meta.sample_compression {
            SampleCompression::Uncompressed => raw.to_vec(),
            other => compress::decompress(raw, other)?,
        };
        let expected = shape_numel(&shape) as usize * T::DATA_TYPE.nbytes();
        if decoded.len() != expected {
            return Err(ChunkEngineError::Inconsistent(
                "sample byte count disagrees with its shape",
            ));
        }
        let values = T::from_le_bytes(&decoded);
        let dims: Vec<usize> = shape.iter().map(|d| *d as usize).collect();
        let arr = ndarray::ArrayD::from_shape_vec(ndarray::IxDyn(&dims), values)
            .map_err(|_| ChunkEngineError::Inconsistent("shape header disagrees with payload"))?;
        Ok(arr.into_shared())
    }
}
