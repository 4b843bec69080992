//! Language tags and the toolchain table that maps them to commands.
//!
//! The mapping (entry filename, optional compile step, run step) is
//! configuration data: the sandbox dispatch never branches on a language, it
//! only looks the toolchain up. Adding a language means adding one table
//! entry, either in [`ToolchainMap::default`] or in a TOML override file.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// A supported target language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Language {
    Python,
    Go,
    JavaScript,
    Java,
    Cpp,
    Php,
    Shell,
}

impl Language {
    pub const ALL: [Language; 7] = [
        Language::Python,
        Language::Go,
        Language::JavaScript,
        Language::Java,
        Language::Cpp,
        Language::Php,
        Language::Shell,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Go => "go",
            Language::JavaScript => "javascript",
            Language::Java => "java",
            Language::Cpp => "cpp",
            Language::Php => "php",
            Language::Shell => "shell",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = anyhow::Error;

    /// Substring matching, so caller-supplied tags like "python3", "node/js"
    /// or "c++17" resolve. The "js" check must precede "java": "javascript"
    /// contains both.
    fn from_str(s: &str) -> Result<Self> {
        let tag = s.to_lowercase();
        if tag.contains("python") {
            Ok(Language::Python)
        } else if tag.contains("go") {
            Ok(Language::Go)
        } else if tag.contains("js") || tag.contains("javascript") {
            Ok(Language::JavaScript)
        } else if tag.contains("java") {
            Ok(Language::Java)
        } else if tag.contains("cpp") || tag.contains("c++") {
            Ok(Language::Cpp)
        } else if tag.contains("php") {
            Ok(Language::Php)
        } else if tag.contains("sh") || tag.contains("shell") {
            Ok(Language::Shell)
        } else {
            Err(anyhow!("unsupported language: {s}"))
        }
    }
}

/// Toolchain commands for one language.
///
/// Command arguments may contain `{entry}` (entry filename), `{dir}` (scratch
/// directory) and `{timeout_secs}` placeholders, substituted per call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Toolchain {
    /// Conventional entry filename the source is materialized under.
    pub entry_file: String,
    /// Build step, run before `run`. A non-zero exit short-circuits the call.
    #[serde(default)]
    pub compile: Option<Vec<String>>,
    /// Run step, executed under the hard wall-clock timeout.
    pub run: Vec<String>,
    /// Mark the entry file executable before running (shell scripts).
    #[serde(default)]
    pub executable_entry: bool,
}

impl Toolchain {
    /// Check the commands are runnable: an entry filename, a non-empty run
    /// command, and a non-empty compile command when one is configured.
    pub fn validate(&self) -> Result<()> {
        if self.entry_file.trim().is_empty() {
            return Err(anyhow!("entry_file must be non-empty"));
        }
        if self.run.is_empty() {
            return Err(anyhow!("run must be a non-empty array"));
        }
        if let Some(compile) = &self.compile {
            if compile.is_empty() {
                return Err(anyhow!("compile must be a non-empty array when set"));
            }
        }
        Ok(())
    }
}

/// The closed language→toolchain table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ToolchainMap {
    entries: BTreeMap<String, Toolchain>,
}

impl Default for ToolchainMap {
    fn default() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            Language::Python.as_str().to_string(),
            Toolchain {
                entry_file: "script.py".to_string(),
                compile: None,
                run: args(&["python3", "{entry}"]),
                executable_entry: false,
            },
        );
        entries.insert(
            Language::Go.as_str().to_string(),
            Toolchain {
                entry_file: "main_test.go".to_string(),
                compile: None,
                run: args(&["go", "test", "-timeout={timeout_secs}s", "{entry}"]),
                executable_entry: false,
            },
        );
        entries.insert(
            Language::JavaScript.as_str().to_string(),
            Toolchain {
                entry_file: "test.js".to_string(),
                compile: None,
                run: args(&["node", "{entry}"]),
                executable_entry: false,
            },
        );
        entries.insert(
            Language::Java.as_str().to_string(),
            Toolchain {
                entry_file: "Main.java".to_string(),
                compile: Some(args(&["javac", "{entry}"])),
                run: args(&["java", "Main"]),
                executable_entry: false,
            },
        );
        entries.insert(
            Language::Cpp.as_str().to_string(),
            Toolchain {
                entry_file: "test.cpp".to_string(),
                compile: Some(args(&["g++", "-std=c++17", "{entry}", "-o", "test"])),
                run: args(&["./test"]),
                executable_entry: false,
            },
        );
        entries.insert(
            Language::Php.as_str().to_string(),
            Toolchain {
                entry_file: "test.php".to_string(),
                compile: None,
                run: args(&["php", "{entry}"]),
                executable_entry: false,
            },
        );
        entries.insert(
            Language::Shell.as_str().to_string(),
            Toolchain {
                entry_file: "test.sh".to_string(),
                compile: None,
                run: args(&["/bin/bash", "{entry}"]),
                executable_entry: true,
            },
        );
        Self { entries }
    }
}

impl ToolchainMap {
    /// Look up a language's toolchain. Failure here is the one configuration
    /// fault allowed to surface to callers, and it happens before any scratch
    /// resource is allocated.
    pub fn get(&self, lang: Language) -> Result<&Toolchain> {
        self.entries
            .get(lang.as_str())
            .ok_or_else(|| anyhow!("unsupported language: no toolchain configured for {lang}"))
    }

    /// Replace or add the toolchain for a language.
    pub fn insert(&mut self, lang: Language, toolchain: Toolchain) {
        self.entries.insert(lang.as_str().to_string(), toolchain);
    }

    /// Load overrides from a TOML file, merged over the built-in table.
    ///
    /// A missing file yields the defaults; entries present in the file win.
    pub fn load(path: &Path) -> Result<Self> {
        let mut map = Self::default();
        if !path.exists() {
            return Ok(map);
        }
        let contents =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let overrides: BTreeMap<String, Toolchain> =
            toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
        for (tag, toolchain) in overrides {
            toolchain
                .validate()
                .with_context(|| format!("invalid toolchain for {tag} in {}", path.display()))?;
            map.entries.insert(tag, toolchain);
        }
        Ok(map)
    }
}

/// Substitute placeholders in one command argument.
pub(crate) fn fill(template: &str, entry: &str, dir: &Path, timeout: Duration) -> String {
    template
        .replace("{entry}", entry)
        .replace("{dir}", &dir.display().to_string())
        .replace("{timeout_secs}", &timeout.as_secs().to_string())
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_aliases() {
        assert_eq!("python3".parse::<Language>().unwrap(), Language::Python);
        assert_eq!("js".parse::<Language>().unwrap(), Language::JavaScript);
        assert_eq!(
            "JavaScript".parse::<Language>().unwrap(),
            Language::JavaScript
        );
        assert_eq!("java".parse::<Language>().unwrap(), Language::Java);
        assert_eq!("c++".parse::<Language>().unwrap(), Language::Cpp);
        assert_eq!("sh".parse::<Language>().unwrap(), Language::Shell);
    }

    #[test]
    fn rejects_unknown_language() {
        let err = "cobol".parse::<Language>().unwrap_err();
        assert!(err.to_string().contains("unsupported language"));
    }

    #[test]
    fn default_table_covers_every_language() {
        let map = ToolchainMap::default();
        for lang in Language::ALL {
            let toolchain = map.get(lang).expect("toolchain");
            assert!(!toolchain.entry_file.is_empty());
            assert!(!toolchain.run.is_empty());
        }
    }

    #[test]
    fn compile_step_only_where_expected() {
        let map = ToolchainMap::default();
        assert!(map.get(Language::Java).unwrap().compile.is_some());
        assert!(map.get(Language::Cpp).unwrap().compile.is_some());
        assert!(map.get(Language::Python).unwrap().compile.is_none());
    }

    #[test]
    fn fill_substitutes_placeholders() {
        let dir = Path::new("/tmp/scratch");
        let arg = fill(
            "-timeout={timeout_secs}s",
            "main_test.go",
            dir,
            Duration::from_secs(10),
        );
        assert_eq!(arg, "-timeout=10s");
        assert_eq!(
            fill("{dir}/out", "e", dir, Duration::from_secs(1)),
            "/tmp/scratch/out"
        );
        assert_eq!(fill("{entry}", "e.py", dir, Duration::from_secs(1)), "e.py");
    }

    #[test]
    fn load_merges_overrides_over_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("toolchains.toml");
        fs::write(
            &path,
            r#"
[python]
entry_file = "prog.py"
run = ["python3", "-O", "{entry}"]
"#,
        )
        .expect("write");

        let map = ToolchainMap::load(&path).expect("load");
        let python = map.get(Language::Python).expect("python");
        assert_eq!(python.entry_file, "prog.py");
        assert_eq!(python.run[1], "-O");
        // untouched entries keep their defaults
        assert_eq!(map.get(Language::Shell).unwrap().entry_file, "test.sh");
    }

    #[test]
    fn validate_rejects_empty_commands() {
        let toolchain = Toolchain {
            entry_file: "t.sh".to_string(),
            compile: None,
            run: vec![],
            executable_entry: false,
        };
        assert!(toolchain.validate().is_err());

        let toolchain = Toolchain {
            entry_file: "t.cpp".to_string(),
            compile: Some(vec![]),
            run: args(&["./t"]),
            executable_entry: false,
        };
        assert!(toolchain.validate().is_err());

        for lang in Language::ALL {
            ToolchainMap::default().get(lang).unwrap().validate().expect("default");
        }
    }

    #[test]
    fn load_rejects_invalid_overrides() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("toolchains.toml");
        fs::write(
            &path,
            r#"
[python]
entry_file = "prog.py"
run = []
"#,
        )
        .expect("write");

        let err = ToolchainMap::load(&path).unwrap_err();
        assert!(err.to_string().contains("invalid toolchain for python"));
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let map = ToolchainMap::load(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(map, ToolchainMap::default());
    }
}
