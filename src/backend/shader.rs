// Shader blob loading and module creation
//
// Vulkan consumes SPIR-V bytecode. The blobs are compiled ahead of time
// (see build.rs) and read from disk at startup; a missing file is fatal.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::Path;

use crate::config::ShaderConfig;

/// SPIR-V words for both stages, loaded before any window exists
#[derive(Debug, Clone)]
pub struct ShaderBlobs {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

impl ShaderBlobs {
    pub fn load(config: &ShaderConfig) -> Result<Self> {
        Ok(Self {
            vertex: load_spirv(&config.vertex)?,
            fragment: load_spirv(&config.fragment)?,
        })
    }
}

/// Read a SPIR-V file into aligned words
pub fn load_spirv(path: &Path) -> Result<Vec<u32>> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to load shader {:?}", path))?;
    parse_spirv(&bytes).with_context(|| format!("Shader {:?} is not valid SPIR-V", path))
}

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Checks length and magic number; read_spv also fixes alignment and endianness
pub fn parse_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    let words = ash::util::read_spv(&mut Cursor::new(bytes))?;
    match words.first() {
        None => anyhow::bail!("empty shader blob"),
        Some(&magic) if magic != SPIRV_MAGIC => {
            anyhow::bail!("bad magic number {:#010x}", magic)
        }
        Some(_) => Ok(words),
    }
}

/// Create a shader module from SPIR-V words
pub fn create_shader_module(device: &ash::Device, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::default().code(code);

    unsafe {
        device
            .create_shader_module(&create_info, None)
            .context("Failed to create shader module")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn magic_number_is_accepted() {
        let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&0x0001_0000u32.to_le_bytes());

        let words = parse_spirv(&bytes).unwrap();
        assert_eq!(words, vec![SPIRV_MAGIC, 0x0001_0000]);
    }

    #[test]
    fn foreign_data_is_rejected() {
        assert!(parse_spirv(b"#version 450").is_err());
        assert!(parse_spirv(&[]).is_err());
    }

    #[test]
    fn unaligned_blob_is_rejected() {
        assert!(parse_spirv(&[0x03, 0x02, 0x23, 0x07, 0x00]).is_err());
    }

    #[test]
    fn missing_shader_names_the_path() {
        let config = ShaderConfig {
            vertex: PathBuf::from("no/such/dir/vert.spv"),
            fragment: PathBuf::from("no/such/dir/frag.spv"),
        };

        let err = ShaderBlobs::load(&config).unwrap_err();
        assert!(format!("{:#}", err).contains("vert.spv"));
    }
}
