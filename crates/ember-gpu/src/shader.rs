//! Shader module loading.
//!
//! Shaders are addressed by the URI of their GLSL source. The compiled
//! SPIR-V lives next to it at `<uri>.spv`; when the source is reachable on
//! the local filesystem and newer than the binary, an external compiler is
//! run first. Missing or broken shaders yield `None`, never an error.

use crate::context::GpuContext;
use crate::error::Result;
use crate::resource::Owned;
use ash::vk;
use hashbrown::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

/// Extension appended to a source URI to find its compiled binary.
pub const BINARY_EXTENSION: &str = "spv";

/// Read-only asset storage.
pub trait DataStore: Send + Sync {
    /// Read the whole resource, `None` when absent.
    fn read_bytes(&self, uri: &str) -> Option<Vec<u8>>;

    /// Filesystem path backing `uri`, if any. Used to decide whether a
    /// shader must be recompiled.
    fn local_path(&self, _uri: &str) -> Option<PathBuf> {
        None
    }
}

/// Data store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl DataStore for FileStore {
    fn read_bytes(&self, uri: &str) -> Option<Vec<u8>> {
        std::fs::read(self.root.join(uri)).ok()
    }

    fn local_path(&self, uri: &str) -> Option<PathBuf> {
        Some(self.root.join(uri))
    }
}

/// URI of the compiled binary for a shader source URI.
pub fn binary_uri(uri: &str) -> String {
    format!("{uri}.{BINARY_EXTENSION}")
}

/// Out-of-process GLSL to SPIR-V compiler.
#[derive(Debug, Clone)]
pub struct ShaderCompiler {
    program: Option<PathBuf>,
    available: Option<bool>,
}

impl Default for ShaderCompiler {
    fn default() -> Self {
        Self::new("glslc")
    }
}

impl ShaderCompiler {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: Some(program.into()),
            available: None,
        }
    }

    /// A compiler that never runs; only existing binaries are used.
    pub const fn disabled() -> Self {
        Self {
            program: None,
            available: Some(false),
        }
    }

    /// Whether `binary` is missing or older than `source`. A missing source
    /// never needs compiling.
    pub fn needs_compile(source: &Path, binary: &Path) -> bool {
        let Ok(source_modified) = std::fs::metadata(source).and_then(|m| m.modified()) else {
            return false;
        };
        std::fs::metadata(binary)
            .and_then(|m| m.modified())
            .map_or(true, |binary_modified| source_modified > binary_modified)
    }

    /// Probe the compiler once and remember the answer.
    fn is_available(&mut self) -> bool {
        if let Some(available) = self.available {
            return available;
        }
        let available = self.program.as_ref().is_some_and(|program| {
            Command::new(program)
                .arg("--version")
                .output()
                .is_ok_and(|output| output.status.success())
        });
        if !available {
            tracing::warn!(
                "Shader compiler {:?} not found; using precompiled binaries only",
                self.program
            );
        }
        self.available = Some(available);
        available
    }

    /// Compile `source` into `binary`. Returns whether a fresh binary was
    /// written.
    pub fn compile(&mut self, source: &Path, binary: &Path) -> bool {
        if !self.is_available() {
            return false;
        }
        let Some(program) = self.program.as_ref() else {
            return false;
        };

        tracing::info!("Compiling shader {}", source.display());
        match Command::new(program).arg(source).arg("-o").arg(binary).output() {
            Ok(output) if output.status.success() => true,
            Ok(output) => {
                tracing::warn!(
                    "Failed to compile {}: {}",
                    source.display(),
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                false
            }
            Err(e) => {
                tracing::warn!("Failed to run shader compiler: {e}");
                false
            }
        }
    }
}

/// Creates shader modules from SPIR-V.
pub trait ShaderBackend {
    type Module;

    fn create_module(&mut self, uri: &str, code: &[u32]) -> Result<Self::Module>;

    fn raw(module: &Self::Module) -> vk::ShaderModule;
}

/// Vulkan shader modules.
pub struct VkShaderBackend {
    ctx: Arc<GpuContext>,
}

impl VkShaderBackend {
    pub fn new(ctx: &Arc<GpuContext>) -> Self {
        Self {
            ctx: Arc::clone(ctx),
        }
    }
}

impl ShaderBackend for VkShaderBackend {
    type Module = Owned<vk::ShaderModule>;

    fn create_module(&mut self, _uri: &str, code: &[u32]) -> Result<Self::Module> {
        let create_info = vk::ShaderModuleCreateInfo::default().code(code);
        unsafe {
            let module = self.ctx.device().create_shader_module(&create_info, None)?;
            Ok(Owned::from_raw(&self.ctx, module))
        }
    }

    fn raw(module: &Self::Module) -> vk::ShaderModule {
        module.raw()
    }
}

/// Shader modules memoized by source URI.
///
/// Failed loads are memoized as well, so a broken shader is reported once
/// rather than every frame; [`ShaderCache::clear`] forgets both.
pub struct ShaderCache<B: ShaderBackend> {
    backend: B,
    store: Arc<dyn DataStore>,
    compiler: ShaderCompiler,
    modules: HashMap<String, Option<B::Module>>,
}

impl<B: ShaderBackend> ShaderCache<B> {
    pub fn new(backend: B, store: Arc<dyn DataStore>, compiler: ShaderCompiler) -> Self {
        Self {
            backend,
            store,
            compiler,
            modules: HashMap::new(),
        }
    }

    /// Module for the shader at `uri`, loading it on first use.
    pub fn load(&mut self, uri: &str) -> Option<vk::ShaderModule> {
        if let Some(module) = self.modules.get(uri) {
            return module.as_ref().map(B::raw);
        }

        let module = self.load_uncached(uri);
        let raw = module.as_ref().map(B::raw);
        self.modules.insert(uri.to_owned(), module);
        raw
    }

    fn load_uncached(&mut self, uri: &str) -> Option<B::Module> {
        let binary = binary_uri(uri);

        if let (Some(source_path), Some(binary_path)) =
            (self.store.local_path(uri), self.store.local_path(&binary))
        {
            if ShaderCompiler::needs_compile(&source_path, &binary_path) {
                self.compiler.compile(&source_path, &binary_path);
            }
        }

        let Some(bytes) = self.store.read_bytes(&binary) else {
            tracing::warn!("Shader binary {binary} not found");
            return None;
        };

        let code = match ash::util::read_spv(&mut Cursor::new(&bytes)) {
            Ok(code) => code,
            Err(e) => {
                tracing::warn!("Invalid SPIR-V in {binary}: {e}");
                return None;
            }
        };

        match self.backend.create_module(uri, &code) {
            Ok(module) => {
                tracing::debug!("Loaded shader {uri}");
                Some(module)
            }
            Err(e) => {
                tracing::warn!("Failed to create shader module for {uri}: {e}");
                None
            }
        }
    }

    /// Forget every module. Only valid after the device has gone idle and
    /// every pipeline built from these modules has been dropped.
    pub fn clear(&mut self) {
        self.modules.clear();
    }

    /// Number of URIs with a memoized result.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::fs;
    use std::time::{Duration, SystemTime};

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[derive(Default)]
    struct MemoryStore {
        files: std::collections::HashMap<String, Vec<u8>>,
    }

    impl MemoryStore {
        fn with(mut self, uri: &str, bytes: Vec<u8>) -> Self {
            self.files.insert(uri.to_owned(), bytes);
            self
        }
    }

    impl DataStore for MemoryStore {
        fn read_bytes(&self, uri: &str) -> Option<Vec<u8>> {
            self.files.get(uri).cloned()
        }
    }

    #[derive(Default)]
    struct CountingBackend {
        created: u64,
    }

    impl ShaderBackend for CountingBackend {
        type Module = vk::ShaderModule;

        fn create_module(&mut self, _uri: &str, code: &[u32]) -> Result<Self::Module> {
            assert_eq!(code[0], SPIRV_MAGIC);
            self.created += 1;
            Ok(vk::ShaderModule::from_raw(self.created))
        }

        fn raw(module: &Self::Module) -> vk::ShaderModule {
            *module
        }
    }

    fn spirv() -> Vec<u8> {
        [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]
            .iter()
            .flat_map(|word| word.to_le_bytes())
            .collect()
    }

    fn cache(store: MemoryStore) -> ShaderCache<CountingBackend> {
        ShaderCache::new(
            CountingBackend::default(),
            Arc::new(store),
            ShaderCompiler::disabled(),
        )
    }

    #[test]
    fn loads_once_per_uri() {
        let mut shaders = cache(MemoryStore::default().with("sprite.vert.spv", spirv()));

        let first = shaders.load("sprite.vert");
        assert!(first.is_some());
        for _ in 0..10 {
            assert_eq!(shaders.load("sprite.vert"), first);
        }
        assert_eq!(shaders.backend.created, 1);
    }

    #[test]
    fn missing_binary_is_none_and_memoized() {
        let mut shaders = cache(MemoryStore::default());

        assert_eq!(shaders.load("missing.frag"), None);
        assert_eq!(shaders.load("missing.frag"), None);
        assert_eq!(shaders.len(), 1);
        assert_eq!(shaders.backend.created, 0);
    }

    #[test]
    fn malformed_spirv_is_none() {
        let mut shaders = cache(MemoryStore::default().with("bad.frag.spv", vec![1, 2, 3]));
        assert_eq!(shaders.load("bad.frag"), None);
    }

    #[test]
    fn clear_reloads() {
        let mut shaders = cache(MemoryStore::default().with("sprite.vert.spv", spirv()));
        let first = shaders.load("sprite.vert");
        shaders.clear();
        let second = shaders.load("sprite.vert");

        assert_ne!(first, second);
        assert_eq!(shaders.backend.created, 2);
    }

    #[test]
    fn binary_uri_appends_extension() {
        assert_eq!(binary_uri("shaders/line.vert"), "shaders/line.vert.spv");
    }

    #[test]
    fn staleness_follows_modification_times() {
        let dir = std::env::temp_dir().join(format!("ember-shader-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let source = dir.join("quad.vert");
        let binary = dir.join("quad.vert.spv");
        let _ = fs::remove_file(&binary);

        fs::write(&source, "#version 450\nvoid main() {}\n").unwrap();
        assert!(ShaderCompiler::needs_compile(&source, &binary));

        fs::write(&binary, spirv()).unwrap();
        let now = SystemTime::now();
        fs::File::options()
            .write(true)
            .open(&source)
            .unwrap()
            .set_modified(now - Duration::from_secs(60))
            .unwrap();
        assert!(!ShaderCompiler::needs_compile(&source, &binary));

        fs::File::options()
            .write(true)
            .open(&source)
            .unwrap()
            .set_modified(now + Duration::from_secs(60))
            .unwrap();
        assert!(ShaderCompiler::needs_compile(&source, &binary));

        assert!(!ShaderCompiler::needs_compile(&dir.join("absent.frag"), &binary));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn file_store_resolves_under_root() {
        let store = FileStore::new("assets");
        assert_eq!(
            store.local_path("shaders/a.frag"),
            Some(PathBuf::from("assets/shaders/a.frag"))
        );
        assert_eq!(store.read_bytes("does/not/exist"), None);
    }
}
