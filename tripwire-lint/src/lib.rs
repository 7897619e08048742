#![forbid(unsafe_code)]

//! # tripwire-lint
//!
//! Static checks for code that handles failures as `Result` values:
//!
//! | rule     | default | finds |
//! |----------|---------|-------|
//! | `TRW001` | warning | a Result-typed expression statement whose value is dropped |
//! | `TRW002` | warning | `.unwrap()` / `.expect()` on a Result not proven `Ok` by a preceding check |
//! | `TRW003` | warning | `.map` with a Result-returning function (`Result<Result<..>>`); use `and_then` |
//! | `TRW004` | error   | `Err(Error::none())`, a failure that carries no error |
//!
//! The analysis is syntactic. Whether an expression is a Result is decided from what the file
//! declares (see [`semantic`]); when in doubt a rule stays silent.
//!
//! ```rust
//! use tripwire_lint::{analyze_source, LintConfig, RuleId};
//!
//! let src = r#"
//!     fn load() -> Result<u8, String> { Ok(1) }
//!     fn main() {
//!         let r = load();
//!         if r.is_err() { return; }
//!         let v = r.unwrap();
//!     }
//! "#;
//! let diagnostics = analyze_source(src, &LintConfig::default()).unwrap();
//! assert!(diagnostics.iter().all(|d| d.rule != RuleId::UncheckedAccess));
//! ```

pub mod config;
pub mod diagnostic;
mod guard;
mod rules;
pub mod semantic;
mod walk;

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

pub use config::LintConfig;
pub use diagnostic::{Diagnostic, ParseRuleError, RuleId, Severity};

/// Failures of the analyzer itself, as opposed to findings in the analyzed code.
#[derive(Debug, thiserror::Error)]
pub enum LintError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{file}:{line}:{column}: failed to parse: {message}")]
    Parse { file: String, line: usize, column: usize, message: String },
}

/// Analyze one source text. Diagnostics are sorted by position.
pub fn analyze_source(source: &str, config: &LintConfig) -> Result<Vec<Diagnostic>, LintError> {
    analyze_named("<source>", source, config)
}

fn analyze_named(
    file: &str,
    source: &str,
    config: &LintConfig,
) -> Result<Vec<Diagnostic>, LintError> {
    let ast = syn::parse_file(source).map_err(|e| {
        let start = e.span().start();
        LintError::Parse {
            file: file.to_string(),
            line: start.line,
            column: start.column + 1,
            message: e.to_string(),
        }
    })?;
    let model = semantic::SemanticModel::build(&ast, config);
    let mut diagnostics = walk::check_file(&ast, &model, config, file);
    diagnostics.sort_by_key(|d| (d.line, d.column, d.rule));
    tracing::debug!(file, diagnostics = diagnostics.len(), "analyzed");
    Ok(diagnostics)
}

/// Analyze one file on disk.
pub fn analyze_file(path: &Path, config: &LintConfig) -> Result<Vec<Diagnostic>, LintError> {
    let source = std::fs::read_to_string(path)
        .map_err(|source| LintError::Io { path: path.to_path_buf(), source })?;
    analyze_named(&path.display().to_string(), &source, config)
}

/// Analyze files and directories. Directories are walked for `.rs` files, skipping `target/`
/// and hidden directories. Files are visited in path order.
pub fn analyze_paths<P: AsRef<Path>>(
    paths: &[P],
    config: &LintConfig,
) -> Result<Vec<Diagnostic>, LintError> {
    let mut diagnostics = Vec::new();
    for root in paths {
        let root = root.as_ref();
        if root.is_file() {
            diagnostics.extend(analyze_file(root, config)?);
            continue;
        }
        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_skipped_dir(entry));
        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                LintError::Io { path, source: e.into() }
            })?;
            let path = entry.path();
            if entry.file_type().is_file() && path.extension().is_some_and(|ext| ext == "rs") {
                diagnostics.extend(analyze_file(path, config)?);
            } else {
                tracing::trace!(path = %path.display(), "skipped");
            }
        }
    }
    Ok(diagnostics)
}

fn is_skipped_dir(entry: &walkdir::DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry.file_name().to_str().is_some_and(|name| name == "target" || name.starts_with('.'))
}
