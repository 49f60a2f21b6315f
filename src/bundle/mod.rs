//! Program bundle data model and its JSON transport encoding.
//!
//! A bundle is one entry module plus ordered packages of modules. Module
//! sources travel base64-encoded so arbitrary bytes survive the JSON framing.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::BundleError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Module {
    pub name: String,
    /// Where the source came from. Informational only.
    pub origin_path: String,
    /// Base64 of the raw source bytes.
    pub source: String,
}

impl Module {
    pub fn new(name: impl Into<String>, origin_path: impl Into<String>, source: impl AsRef<[u8]>) -> Self {
        Self {
            name: name.into(),
            origin_path: origin_path.into(),
            source: STANDARD.encode(source.as_ref()),
        }
    }

    /// Reads `path` and wraps its contents as a module.
    pub fn from_path(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self, BundleError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| BundleError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::new(name, path.to_string_lossy(), bytes))
    }

    pub fn source_bytes(&self) -> Result<Vec<u8>, BundleError> {
        STANDARD
            .decode(self.source.as_bytes())
            .map_err(|source| BundleError::Base64 {
                module: self.name.clone(),
                source,
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Package {
    pub name: String,
    pub path: String,
    pub modules: Vec<Module>,
}

impl Package {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            modules: Vec::new(),
        }
    }

    /// Appends a module, rejecting a name already used in this package.
    pub fn push_module(&mut self, module: Module) -> Result<(), BundleError> {
        if self.modules.iter().any(|m| m.name == module.name) {
            return Err(BundleError::DuplicateModule {
                package: self.name.clone(),
                module: module.name,
            });
        }
        self.modules.push(module);
        Ok(())
    }

    pub fn with_module(mut self, module: Module) -> Result<Self, BundleError> {
        self.push_module(module)?;
        Ok(self)
    }

    /// Builds a package from the `*.py` files directly inside `dir`, in file name order.
    pub fn from_dir(name: impl Into<String>, dir: impl AsRef<Path>) -> Result<Self, BundleError> {
        let dir = dir.as_ref();
        let io_err = |source| BundleError::Io {
            path: dir.display().to_string(),
            source,
        };

        let mut files = Vec::new();
        for entry in fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "py") {
                files.push(path);
            }
        }
        files.sort();

        let mut package = Package::new(name, dir.to_string_lossy());
        for path in files {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            package.push_module(Module::from_path(stem, &path)?)?;
        }
        Ok(package)
    }

    fn validate(&self) -> Result<(), BundleError> {
        let mut seen = HashSet::new();
        for module in &self.modules {
            if !seen.insert(module.name.as_str()) {
                return Err(BundleError::DuplicateModule {
                    package: self.name.clone(),
                    module: module.name.clone(),
                });
            }
            module.source_bytes()?;
        }
        Ok(())
    }
}

/// The unit handed to the child: an entry module plus supporting packages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProgramBundle {
    pub name: String,
    pub path: String,
    pub entry_module: Module,
    pub packages: Vec<Package>,
}

impl ProgramBundle {
    pub fn new(name: impl Into<String>, path: impl Into<String>, entry_module: Module) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            entry_module,
            packages: Vec::new(),
        }
    }

    pub fn add_package(&mut self, package: Package) -> Result<(), BundleError> {
        if self.packages.iter().any(|p| p.name == package.name) {
            return Err(BundleError::DuplicatePackage(package.name));
        }
        package.validate()?;
        self.packages.push(package);
        Ok(())
    }

    pub fn with_package(mut self, package: Package) -> Result<Self, BundleError> {
        self.add_package(package)?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), BundleError> {
        let mut seen = HashSet::new();
        for package in &self.packages {
            if !seen.insert(package.name.as_str()) {
                return Err(BundleError::DuplicatePackage(package.name.clone()));
            }
            package.validate()?;
        }
        self.entry_module.source_bytes()?;
        Ok(())
    }
}

/// Serializes a bundle into the stage-two transport payload.
///
/// Output is deterministic: fields are emitted in declaration order and
/// collections keep insertion order.
pub fn encode(bundle: &ProgramBundle) -> Result<Vec<u8>, BundleError> {
    bundle.validate()?;
    Ok(serde_json::to_vec(bundle)?)
}

/// Parses a payload produced by [`encode`]. Any structural problem is an error;
/// nothing is returned partially.
pub fn decode(bytes: &[u8]) -> Result<ProgramBundle, BundleError> {
    let bundle: ProgramBundle = serde_json::from_slice(bytes)?;
    bundle.validate()?;
    Ok(bundle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ProgramBundle {
        let helpers = Package::new("helpers", "/src/helpers")
            .with_module(Module::new("m1", "/src/helpers/m1.py", "print('m1')\n"))
            .and_then(|p| p.with_module(Module::new("m2", "/src/helpers/m2.py", "print('m2')\n")))
            .unwrap();
        let extra = Package::new("extra", "/src/extra")
            .with_module(Module::new("m3", "/src/extra/m3.py", b"\x00\x1b\"}\n\xff"))
            .unwrap();
        ProgramBundle::new("app", "/src", Module::new("__main__", "/src/main.py", "import helpers\n"))
            .with_package(helpers)
            .and_then(|b| b.with_package(extra))
            .unwrap()
    }

    /// xorshift64, so every run sees the same shapes.
    struct Shapes(u64);

    impl Shapes {
        fn next(&mut self) -> u64 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            self.0
        }

        fn below(&mut self, n: usize) -> usize {
            (self.next() % n as u64) as usize
        }

        fn bytes(&mut self) -> Vec<u8> {
            let len = match self.below(4) {
                0 => 0,
                1 => self.below(8),
                _ => self.below(2048),
            };
            (0..len).map(|_| self.next() as u8).collect()
        }

        fn text(&mut self, index: usize) -> String {
            const PIECES: [&str; 6] = ["mod", "módulo_ü", "包", "pkg-\u{1F600}", "sp ace", "quo\"te"];
            format!("{}{index}", PIECES[self.below(PIECES.len())])
        }

        fn module(&mut self, index: usize) -> (Module, Vec<u8>) {
            let raw = self.bytes();
            let name = self.text(index);
            let origin = format!("/src/{}/{name}.py", self.text(index));
            (Module::new(name, origin, &raw), raw)
        }
    }

    #[test]
    fn decode_inverts_encode_for_generated_bundles() {
        let mut shapes = Shapes(0x9e37_79b9_7f4a_7c15);
        for round in 0..200 {
            let (entry, entry_raw) = shapes.module(0);
            let mut bundle = ProgramBundle::new(shapes.text(round), shapes.text(round), entry);
            let mut raws = Vec::new();

            let package_count = match round % 5 {
                0 => 0,
                1 => 40,
                _ => shapes.below(6),
            };
            for p in 0..package_count {
                let mut package = Package::new(shapes.text(p), shapes.text(p));
                let mut package_raws = Vec::new();
                for m in 0..shapes.below(4) {
                    let (module, raw) = shapes.module(m);
                    package.push_module(module).unwrap();
                    package_raws.push(raw);
                }
                bundle.add_package(package).unwrap();
                raws.push(package_raws);
            }

            let decoded = decode(&encode(&bundle).unwrap()).unwrap();
            assert_eq!(decoded, bundle, "round {round}");
            assert_eq!(decoded.entry_module.source_bytes().unwrap(), entry_raw);
            for (package, package_raws) in decoded.packages.iter().zip(&raws) {
                let sources: Vec<_> = package.modules.iter().map(|m| m.source_bytes().unwrap()).collect();
                assert_eq!(&sources, package_raws, "round {round}, package {}", package.name);
            }
        }
    }

    #[test]
    fn encoding_is_deterministic_and_field_tagged() {
        let bundle = sample();
        let a = encode(&bundle).unwrap();
        let b = encode(&bundle.clone()).unwrap();
        assert_eq!(a, b);

        let value: serde_json::Value = serde_json::from_slice(&a).unwrap();
        assert_eq!(value["entryModule"]["name"], "__main__");
        assert_eq!(value["packages"][0]["modules"][1]["originPath"], "/src/helpers/m2.py");
    }

    #[test]
    fn control_bytes_survive_transport() {
        let bundle = sample();
        let decoded = decode(&encode(&bundle).unwrap()).unwrap();
        let raw = decoded.packages[1].modules[0].source_bytes().unwrap();
        assert_eq!(raw, b"\x00\x1b\"}\n\xff");
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = Package::new("p", "/p")
            .with_module(Module::new("a", "", "x = 1"))
            .and_then(|p| p.with_module(Module::new("a", "", "x = 2")))
            .unwrap_err();
        assert!(matches!(err, BundleError::DuplicateModule { ref module, .. } if module == "a"));

        let mut bundle = sample();
        let err = bundle.add_package(Package::new("helpers", "/other")).unwrap_err();
        assert!(matches!(err, BundleError::DuplicatePackage(ref name) if name == "helpers"));
    }

    #[test]
    fn malformed_payloads_fail_to_decode() {
        assert!(matches!(decode(b"not json"), Err(BundleError::Json(_))));
        assert!(matches!(decode(br#"{"name":"x"}"#), Err(BundleError::Json(_))));

        let mut bundle = sample();
        bundle.entry_module.source = "%%%".into();
        let bytes = serde_json::to_vec(&bundle).unwrap();
        assert!(matches!(decode(&bytes), Err(BundleError::Base64 { .. })));

        let mut bundle = sample();
        let dup = bundle.packages[0].clone();
        bundle.packages.push(dup);
        let bytes = serde_json::to_vec(&bundle).unwrap();
        assert!(matches!(decode(&bytes), Err(BundleError::DuplicatePackage(_))));
    }

    #[test]
    fn from_dir_reads_python_files_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.py"), "B = 2\n").unwrap();
        fs::write(dir.path().join("a.py"), "A = 1\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "skip").unwrap();

        let package = Package::from_dir("pkg", dir.path()).unwrap();
        let names: Vec<_> = package.modules.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(package.modules[1].source_bytes().unwrap(), b"B = 2\n");
    }
}
