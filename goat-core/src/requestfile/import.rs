use super::{
    document::{with_default_extension, Document},
    error::LoadError,
    parser,
};
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};
use tracing::*;

/// Reads and parses the requestfile at `path` and resolves all of its imports.
pub fn load_file(path: &Path) -> Result<Document, LoadError> {
    let content = read(path)?;
    let mut visited = HashSet::new();
    load(&content, path, &mut visited)
}

/// Parses `content` as the requestfile at `path` and resolves its imports depth first. Every
/// imported document is merged before the actions of the importing one. A document whose
/// parsed content has already been seen aborts the resolution.
pub fn load(
    content: &str,
    path: &Path,
    visited: &mut HashSet<String>,
) -> Result<Document, LoadError> {
    let content = crlf_to_lf(content);
    let doc = parser::parse(&content, path).map_err(|source| LoadError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let fingerprint = serde_json::to_string(&doc)?;
    if !visited.insert(fingerprint) {
        return Err(LoadError::MultiImport);
    }

    let mut merged = Document::new(path);
    for import in &doc.imports {
        let import_path = resolve(doc.dir(), import);
        debug!(from = ?path, import = ?import_path, "following import");

        let imported = read(&import_path)
            .and_then(|content| load(&content, &import_path, visited))
            .map_err(|source| LoadError::Import {
                path: import_path.clone(),
                source: Box::new(source),
            })?;
        merged.merge(&imported);
    }

    merged.merge(&doc);
    merged.imports = doc.imports;
    Ok(merged)
}

fn resolve(dir: &Path, import: &str) -> PathBuf {
    with_default_extension(dir.join(import))
}

fn read(path: &Path) -> Result<String, LoadError> {
    std::fs::read_to_string(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn crlf_to_lf(s: &str) -> String {
    s.replace("\r\n", "\n")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::requestfile::document::Action;
    use pretty_assertions::assert_eq;

    fn uris(actions: &[Action]) -> Vec<String> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Request(req) => Some(req.uri.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn imports_are_merged_before_own_actions() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir(dir.path().join("lib"))?;
        std::fs::write(
            dir.path().join("lib/common.goat"),
            "### setup\n\nPOST http://common/login\n",
        )?;
        std::fs::write(
            dir.path().join("main.goat"),
            "use lib/common\n\n### setup\n\nGET http://main/setup\n\n### tests\n\nGET http://main/test\n",
        )?;

        let doc = load_file(&dir.path().join("main.goat"))?;

        assert_eq!(
            uris(&doc.setup),
            vec!["http://common/login", "http://main/setup"]
        );
        assert_eq!(uris(&doc.tests), vec!["http://main/test"]);
        Ok(())
    }

    #[test]
    fn import_cycle_fails() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("a.goat"), "use b\n\nGET http://a\n")?;
        std::fs::write(dir.path().join("b.goat"), "use a\n\nGET http://b\n")?;

        let err = load_file(&dir.path().join("a.goat")).unwrap_err();

        let mut source: &LoadError = &err;
        while let LoadError::Import { source: inner, .. } = source {
            source = inner;
        }
        assert!(matches!(source, LoadError::MultiImport), "{err}");
        Ok(())
    }

    #[test]
    fn missing_import_names_path() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("main.goat"), "use missing\n")?;

        let err = load_file(&dir.path().join("main.goat")).unwrap_err();

        assert!(err.to_string().contains("missing.goat"), "{err}");
        Ok(())
    }

    #[test]
    fn crlf_is_normalised() -> eyre::Result<()> {
        let mut visited = HashSet::new();
        let doc = load(
            "GET http://a\r\n\r\n[Body]\r\nfoo\r\n",
            Path::new("x.goat"),
            &mut visited,
        )?;
        let Action::Request(req) = &doc.tests[0] else {
            panic!("expected request");
        };
        assert_eq!(req.body.read_to_string()?, "foo\n");
        Ok(())
    }
}
