// SPDX-License-Identifier: CEPL-1.0
//! SPIR-V loading. The bundled shaders are compiled by `build.rs`; a shader
//! directory from the config overrides them.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use ash::util::read_spv;
use ash::vk;
use tracing::info;

use crate::error::{pipeline, VkError, VkResult};

const EMBEDDED_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/mesh.vert.spv"));
const EMBEDDED_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/mesh.frag.spv"));

pub const VERTEX_FILE: &str = "vert.spv";
pub const FRAGMENT_FILE: &str = "frag.spv";

/// Vertex + fragment SPIR-V words.
#[derive(Clone, Debug)]
pub struct ShaderSet {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

impl ShaderSet {
    pub fn embedded() -> VkResult<Self> {
        Ok(Self {
            vertex: parse(Path::new("<embedded>/mesh.vert.spv"), EMBEDDED_VERT)?,
            fragment: parse(Path::new("<embedded>/mesh.frag.spv"), EMBEDDED_FRAG)?,
        })
    }

    /// Reads `vert.spv` and `frag.spv` from `dir`.
    pub fn from_dir(dir: &Path) -> VkResult<Self> {
        let load = |name: &str| -> VkResult<Vec<u32>> {
            let path = dir.join(name);
            let bytes = std::fs::read(&path).map_err(|source| VkError::ShaderLoad {
                path: path.clone(),
                source,
            })?;
            parse(&path, &bytes)
        };
        let set = Self {
            vertex: load(VERTEX_FILE)?,
            fragment: load(FRAGMENT_FILE)?,
        };
        info!("shaders loaded from {}", dir.display());
        Ok(set)
    }

    pub fn load(dir: Option<&Path>) -> VkResult<Self> {
        match dir {
            Some(dir) => Self::from_dir(dir),
            None => Self::embedded(),
        }
    }
}

fn parse(path: &Path, bytes: &[u8]) -> VkResult<Vec<u32>> {
    read_spv(&mut Cursor::new(bytes)).map_err(|source| VkError::ShaderLoad {
        path: PathBuf::from(path),
        source,
    })
}

/// Shader module destroyed on drop; only needed while building a pipeline.
pub(crate) struct ShaderModule {
    device: ash::Device,
    pub handle: vk::ShaderModule,
}

impl ShaderModule {
    pub fn new(device: &ash::Device, code: &[u32]) -> VkResult<Self> {
        let info = vk::ShaderModuleCreateInfo {
            s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
            p_code: code.as_ptr(),
            code_size: std::mem::size_of_val(code),
            ..Default::default()
        };
        let handle = unsafe { device.create_shader_module(&info, None) }
            .map_err(pipeline("vkCreateShaderModule"))?;
        Ok(Self {
            device: device.clone(),
            handle,
        })
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.device.destroy_shader_module(self.handle, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn test_embedded_shaders_are_spirv() {
        let set = ShaderSet::embedded().unwrap();
        assert_eq!(set.vertex[0], SPIRV_MAGIC);
        assert_eq!(set.fragment[0], SPIRV_MAGIC);
    }

    #[test]
    fn test_missing_dir_names_the_file() {
        let dir = Path::new("/nonexistent/cubelet-shaders");
        match ShaderSet::from_dir(dir) {
            Err(VkError::ShaderLoad { path, .. }) => assert_eq!(path, dir.join(VERTEX_FILE)),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_truncated_spirv_rejected() {
        assert!(parse(Path::new("bad.spv"), &[0x03, 0x02, 0x23]).is_err());
    }

    #[test]
    fn test_from_dir_reads_both_stages() {
        let dir = std::env::temp_dir().join(format!("cubelet-shader-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(VERTEX_FILE), EMBEDDED_VERT).unwrap();
        std::fs::write(dir.join(FRAGMENT_FILE), EMBEDDED_FRAG).unwrap();

        let set = ShaderSet::load(Some(&dir)).unwrap();
        assert_eq!(set.vertex, ShaderSet::embedded().unwrap().vertex);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
