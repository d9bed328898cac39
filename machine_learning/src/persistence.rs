use std::{fs, path::Path};

use safetensors::{Dtype, SafeTensors, tensor::TensorView};

use crate::error::{MlErr, Result};

/// The name of the single tensor holding the flat parameter buffer.
const PARAMS_TENSOR: &str = "params";

/// Writes a parameter buffer atomically as a safetensors file with one little endian `f32`
/// tensor.
///
/// # Arguments
/// * `path` - The destination file.
/// * `params` - The parameters to write.
pub fn save(path: &Path, params: &[f32]) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }

    let bytes: Vec<u8> = params.iter().flat_map(|p| p.to_le_bytes()).collect();
    let view = TensorView::new(Dtype::F32, vec![params.len()], &bytes).map_err(corrupt)?;

    let tmp = path.with_extension("tmp");
    safetensors::serialize_to_file([(PARAMS_TENSOR, view)], &None, &tmp).map_err(corrupt)?;
    fs::rename(tmp, path)?;
    Ok(())
}

/// Reads a parameter buffer previously written with `save`.
///
/// # Arguments
/// * `path` - The file to read.
/// * `expected` - The amount of parameters the caller's model has.
///
/// # Returns
/// The parameters, or an error if the file is malformed or sized for another model.
pub fn load(path: &Path, expected: usize) -> Result<Vec<f32>> {
    let bytes = fs::read(path)?;
    let tensors = SafeTensors::deserialize(&bytes).map_err(corrupt)?;
    let tensor = tensors.tensor(PARAMS_TENSOR).map_err(corrupt)?;

    if tensor.dtype() != Dtype::F32 {
        return Err(MlErr::CorruptParameters(format!(
            "{} holds {:?} parameters",
            path.display(),
            tensor.dtype()
        )));
    }

    let count = tensor.shape().iter().product::<usize>();
    if count != expected {
        return Err(MlErr::SizeMismatch {
            what: "persisted parameters",
            got: count,
            expected,
        });
    }

    Ok(tensor
        .data()
        .chunks_exact(size_of::<f32>())
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn corrupt(e: safetensors::SafeTensorError) -> MlErr {
    MlErr::CorruptParameters(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saved_parameters_load_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ok.safetensors");
        save(&path, &[1.5, -2.0, 0.25]).unwrap();
        assert_eq!(load(&path, 3).unwrap(), vec![1.5, -2.0, 0.25]);
    }

    #[test]
    fn files_are_little_endian_regardless_of_the_host() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("le.safetensors");
        save(&path, &[1.0]).unwrap();

        let bytes = fs::read(&path).unwrap();
        assert!(bytes.ends_with(&1f32.to_le_bytes()));
    }

    #[test]
    fn parameters_for_another_model_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.safetensors");
        save(&path, &[1.0, 2.0]).unwrap();
        assert!(matches!(
            load(&path, 3),
            Err(MlErr::SizeMismatch { got: 2, expected: 3, .. })
        ));
    }

    #[test]
    fn garbage_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.safetensors");
        fs::write(&path, b"nope").unwrap();
        assert!(matches!(load(&path, 1), Err(MlErr::CorruptParameters(_))));
    }
}
