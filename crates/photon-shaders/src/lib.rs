//! Shader compilation for the Photon path tracer.
//!
//! This crate bundles the GLSL path tracing stages and compiles them to
//! SPIR-V at runtime with shaderc, so compile failures surface as
//! recoverable errors carrying the compiler's diagnostics.

use thiserror::Error;

/// GLSL sources bundled with the crate.
pub mod sources {
    /// Shared header: payload, data layouts, root arguments and resource table.
    pub const COMMON: &str = include_str!("../shaders/common.glsl");
    pub const RAY_GENERATION: &str = include_str!("../shaders/pathtracer.rgen");
    pub const MISS: &str = include_str!("../shaders/pathtracer.rmiss");
    pub const CLOSEST_HIT: &str = include_str!("../shaders/pathtracer.rchit");
}

/// Shader compilation errors.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("Shader compiler unavailable")]
    Unavailable,

    #[error("Failed to compile {name}: {message}")]
    Compile { name: String, message: String },
}

pub type Result<T> = std::result::Result<T, CompileError>;

/// Ray tracing stage a source is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderKind {
    RayGeneration,
    Miss,
    ClosestHit,
}

impl ShaderKind {
    const fn to_shaderc(self) -> shaderc::ShaderKind {
        match self {
            Self::RayGeneration => shaderc::ShaderKind::RayGeneration,
            Self::Miss => shaderc::ShaderKind::Miss,
            Self::ClosestHit => shaderc::ShaderKind::ClosestHit,
        }
    }
}

/// SPIR-V for the three path tracing stages.
#[derive(Debug, Clone)]
pub struct ShaderSet {
    pub ray_generation: Vec<u32>,
    pub miss: Vec<u32>,
    pub closest_hit: Vec<u32>,
}

impl ShaderSet {
    /// Modules in pipeline order.
    pub fn modules(&self) -> [&[u32]; 3] {
        [
            self.ray_generation.as_slice(),
            self.miss.as_slice(),
            self.closest_hit.as_slice(),
        ]
    }
}

/// GLSL to SPIR-V compiler targeting Vulkan 1.3.
pub struct ShaderCompiler {
    compiler: shaderc::Compiler,
}

impl ShaderCompiler {
    pub fn new() -> Result<Self> {
        let compiler = shaderc::Compiler::new().ok_or(CompileError::Unavailable)?;
        Ok(Self { compiler })
    }

    /// Compile one stage whose `main` is the entry point.
    pub fn compile(&self, kind: ShaderKind, name: &str, source: &str) -> Result<Vec<u32>> {
        let mut options = shaderc::CompileOptions::new().ok_or(CompileError::Unavailable)?;
        options.set_target_env(
            shaderc::TargetEnv::Vulkan,
            shaderc::EnvVersion::Vulkan1_3 as u32,
        );
        options.set_target_spirv(shaderc::SpirvVersion::V1_6);
        // Keep every declared block member so reflected layouts match across stages
        options.set_optimization_level(shaderc::OptimizationLevel::Zero);

        let artifact = self
            .compiler
            .compile_into_spirv(source, kind.to_shaderc(), name, "main", Some(&options))
            .map_err(|e| CompileError::Compile {
                name: name.to_string(),
                message: e.to_string(),
            })?;

        if artifact.get_num_warnings() > 0 {
            tracing::warn!("Shader warnings in {name}: {}", artifact.get_warning_messages());
        }
        let words = artifact.as_binary().to_vec();
        tracing::debug!("Compiled {name}: {} words", words.len());
        Ok(words)
    }

    /// Compile a stage body prefixed with the shared header.
    pub fn compile_with_common(&self, kind: ShaderKind, name: &str, body: &str) -> Result<Vec<u32>> {
        let source = format!("{}\n#line 1\n{body}", sources::COMMON);
        self.compile(kind, name, &source)
    }

    /// Compile the bundled path tracer.
    pub fn compile_path_tracer(&self) -> Result<ShaderSet> {
        Ok(ShaderSet {
            ray_generation: self.compile_with_common(
                ShaderKind::RayGeneration,
                "pathtracer.rgen",
                sources::RAY_GENERATION,
            )?,
            miss: self.compile_with_common(ShaderKind::Miss, "pathtracer.rmiss", sources::MISS)?,
            closest_hit: self.compile_with_common(
                ShaderKind::ClosestHit,
                "pathtracer.rchit",
                sources::CLOSEST_HIT,
            )?,
        })
    }
}

/// Compile the bundled path tracer with a fresh compiler.
pub fn compile_path_tracer() -> Result<ShaderSet> {
    ShaderCompiler::new()?.compile_path_tracer()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn path_tracer_compiles() {
        let set = compile_path_tracer().unwrap();
        for module in set.modules() {
            assert_eq!(module[0], SPIRV_MAGIC, "Invalid SPIR-V magic number");
            assert!(module.len() > 100, "Shader too small");
        }
    }

    #[test]
    fn closest_hit_shades_every_material_model() {
        let models: Vec<&str> = sources::COMMON
            .lines()
            .filter_map(|line| line.strip_prefix("#define "))
            .filter_map(|line| line.split_whitespace().next())
            .filter(|name| name.starts_with("BSDF_") && *name != "BSDF_DIFFUSE")
            .collect();
        assert_eq!(models.len(), 7);
        for model in models {
            assert!(sources::CLOSEST_HIT.contains(model), "{model} is not shaded");
        }
        for field in 0..6 {
            let read = format!("coatingData[{field}]");
            assert!(sources::CLOSEST_HIT.contains(&read), "{read} is never read");
        }
    }

    #[test]
    fn syntax_errors_are_reported() {
        let compiler = ShaderCompiler::new().unwrap();
        let err = compiler
            .compile_with_common(ShaderKind::Miss, "broken.rmiss", "void main() { oops }")
            .unwrap_err();
        match err {
            CompileError::Compile { name, message } => {
                assert_eq!(name, "broken.rmiss");
                assert!(!message.is_empty());
            }
            CompileError::Unavailable => panic!("compiler should be available"),
        }
    }
}
