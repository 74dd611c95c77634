//! Cache key scheme.
//!
//! One tensor named `K` owns three kinds of blob:
//! `tensor_meta/K`, `chunk_id_encoder/K` and `chunks/K/<chunk name>`.

const TENSOR_META_FOLDER: &str = "tensor_meta";
const CHUNK_ID_ENCODER_FOLDER: &str = "chunk_id_encoder";
const CHUNKS_FOLDER: &str = "chunks";

pub fn tensor_meta_key(tensor: &str) -> String {
    format!("{TENSOR_META_FOLDER}/{tensor}")
}

pub fn chunk_id_encoder_key(tensor: &str) -> String {
    format!("{CHUNK_ID_ENCODER_FOLDER}/{tensor}")
}

pub fn chunk_key(tensor: &str, chunk_name: &str) -> String {
    format!("{CHUNKS_FOLDER}/{tensor}/{chunk_name}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::chunk_id::name_from_id;

    #[test]
    fn keys_are_namespaced_per_tensor() {
        assert_eq!(tensor_meta_key("images"), "tensor_meta/images");
        assert_eq!(chunk_id_encoder_key("images"), "chunk_id_encoder/images");
        assert_eq!(
            chunk_key("images", &name_from_id(0)),
            format!("chunks/images/{}", "0".repeat(25))
        );
    }
}
