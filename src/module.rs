// File: src/module.rs
//
// Module import plumbing. `ModuleImporter` is the host-pluggable
// callback that turns a dotted module name into source text; `FsImporter` is
// the default, used by the CLI and REPL, which resolves `a.b` to
// `<root>/a/b.lum`. Caching and circular-import detection live on `Vm`
// itself, since both need access to the module registry and call stack.

use std::path::PathBuf;

/// Resolves an import name to source text. Implemented by the host embedder
/// to sandbox or redirect imports; `FsImporter` is the CLI default.
pub trait ModuleImporter {
    fn import(&mut self, name: &str) -> Result<String, String>;
}

/// Resolves `import a.b` against `<root>/a/b.lum` on the filesystem.
pub struct FsImporter {
    root: PathBuf,
}

impl FsImporter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        let rel: PathBuf = name.split('.').collect();
        self.root.join(rel).with_extension("lum")
    }
}

impl ModuleImporter for FsImporter {
    fn import(&mut self, name: &str) -> Result<String, String> {
        let path = self.path_for(name);
        std::fs::read_to_string(&path).map_err(|e| format!("cannot import '{}': {}", name, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_name_maps_to_nested_path() {
        let importer = FsImporter::new("/root/scripts");
        assert_eq!(importer.path_for("a.b"), PathBuf::from("/root/scripts/a/b.lum"));
    }

    #[test]
    fn missing_file_reports_the_module_name() {
        let mut importer = FsImporter::new("/nonexistent-lumen-root");
        let err = importer.import("missing").unwrap_err();
        assert!(err.contains("missing"));
    }
}
