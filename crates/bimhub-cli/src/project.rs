//! Directory-backed project that families are loaded into
//!
//! Families live in `<project>/families/<name>.<ext>`. Inside a transaction
//! new files are copied to `<project>/.staging/` and only renamed into place
//! on commit, so a rollback leaves the project as it was.

use bimhub_loader::{
    ConflictChoice, ConflictPrompt, FamilyLoadOptions, Host, HostDocument, HostError,
    HostSession, LoadOutcome, LoadRequest, OverwriteDecision,
};
use std::fs;
use std::io::{self, BufRead, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const FAMILIES_DIR: &str = "families";
const STAGING_DIR: &str = ".staging";
const DEFAULT_EXTENSION: &str = "rfa";
const PROMPT_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
struct StagedFamily {
    staged: PathBuf,
    target: PathBuf,
    /// Existing file with a different extension that the new one replaces
    replaces: Option<PathBuf>,
}

pub struct ProjectDocument {
    root: PathBuf,
    transaction: Option<String>,
    staged: Vec<StagedFamily>,
}

impl ProjectDocument {
    pub fn open(root: &Path) -> io::Result<Self> {
        fs::create_dir_all(root.join(FAMILIES_DIR))?;
        Ok(Self {
            root: root.to_path_buf(),
            transaction: None,
            staged: Vec::new(),
        })
    }

    pub fn families_dir(&self) -> PathBuf {
        self.root.join(FAMILIES_DIR)
    }

    fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    /// Names of the committed families, sorted
    pub fn family_names(&self) -> io::Result<Vec<String>> {
        let mut names: Vec<String> = fs::read_dir(self.families_dir())?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| {
                entry
                    .path()
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
            })
            .collect();
        names.sort();
        Ok(names)
    }

    fn find_family(&self, name: &str) -> io::Result<Option<PathBuf>> {
        for entry in fs::read_dir(self.families_dir())? {
            let path = entry?.path();
            if path.is_file() && path.file_stem().is_some_and(|stem| stem == name) {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }

    fn discard_staged(&mut self) {
        for family in self.staged.drain(..) {
            if let Err(e) = fs::remove_file(&family.staged) {
                if e.kind() != ErrorKind::NotFound {
                    warn!(path = ?family.staged, error = %e, "Failed to remove staged family");
                }
            }
        }
    }
}

impl HostDocument for ProjectDocument {
    fn begin_transaction(&mut self, name: &str) -> Result<(), HostError> {
        if let Some(open) = &self.transaction {
            return Err(HostError::Transaction(format!(
                "transaction '{}' is already open",
                open
            )));
        }
        fs::create_dir_all(self.staging_dir())?;
        self.transaction = Some(name.to_string());
        Ok(())
    }

    fn commit_transaction(&mut self) -> Result<(), HostError> {
        let Some(name) = self.transaction.take() else {
            return Err(HostError::Transaction("no open transaction".to_string()));
        };

        let staged = std::mem::take(&mut self.staged);
        for (i, family) in staged.iter().enumerate() {
            if let Err(e) = fs::rename(&family.staged, &family.target) {
                // Leave the rest for rollback
                self.staged = staged[i..].to_vec();
                self.transaction = Some(name);
                return Err(e.into());
            }
            if let Some(old) = family.replaces.as_ref().filter(|old| **old != family.target) {
                if let Err(e) = fs::remove_file(old) {
                    warn!(path = ?old, error = %e, "Failed to remove replaced family file");
                }
            }
            debug!(path = ?family.target, "Family committed");
        }

        let _ = fs::remove_dir(self.staging_dir());
        info!(transaction = %name, families = staged.len(), "Transaction committed");
        Ok(())
    }

    fn rollback_transaction(&mut self) -> Result<(), HostError> {
        self.discard_staged();
        if let Some(name) = self.transaction.take() {
            info!(transaction = %name, "Transaction rolled back");
        }
        let _ = fs::remove_dir(self.staging_dir());
        Ok(())
    }

    fn load_family(
        &mut self,
        request: &LoadRequest<'_>,
        options: &mut dyn FamilyLoadOptions,
    ) -> Result<LoadOutcome, HostError> {
        if self.transaction.is_none() {
            return Err(HostError::Transaction("no open transaction".to_string()));
        }

        let name = family_name(request);
        if name.is_empty() {
            return Err(HostError::Load(format!(
                "Cannot derive a family name from {}",
                request.path.display()
            )));
        }
        let extension = request
            .path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or(DEFAULT_EXTENSION);

        let existing = self.find_family(&name)?;
        if existing.is_some() {
            match options.on_family_found(&name, false) {
                OverwriteDecision::KeepExisting => return Ok(LoadOutcome::Declined),
                OverwriteDecision::Overwrite { parameter_values } => {
                    debug!(family = %name, parameter_values, "Overwriting existing family");
                }
            }
        }

        let file_name = format!("{}.{}", name, extension);
        let staged = self.staging_dir().join(&file_name);
        fs::copy(request.path, &staged)?;
        self.staged.push(StagedFamily {
            staged,
            target: self.families_dir().join(&file_name),
            replaces: existing.clone(),
        });

        Ok(match existing {
            Some(_) => LoadOutcome::Updated { family_name: name },
            None => LoadOutcome::Loaded { family_name: name },
        })
    }
}

/// Catalog name if given, else the file stem; path separators are replaced
fn family_name(request: &LoadRequest<'_>) -> String {
    let raw = if request.family_name.trim().is_empty() {
        request
            .path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default()
    } else {
        request.family_name.trim().to_string()
    };

    raw.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect()
}

/// Asks on a line-oriented terminal what to do with an existing family
pub struct LinePrompt<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> LinePrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl LinePrompt<io::BufReader<io::Stdin>, io::Stderr> {
    pub fn stdio() -> Self {
        Self::new(io::BufReader::new(io::stdin()), io::stderr())
    }
}

impl<R: BufRead, W: Write> ConflictPrompt for LinePrompt<R, W> {
    fn choose(&mut self, family_name: &str, family_in_use: bool) -> ConflictChoice {
        let in_use = if family_in_use { " and is in use" } else { "" };

        for _ in 0..PROMPT_ATTEMPTS {
            let _ = write!(
                self.output,
                "Family '{}' already exists{}. [r]eplace, replace with [p]arameters, [c]ancel: ",
                family_name, in_use
            );
            let _ = self.output.flush();

            let mut line = String::new();
            match self.input.read_line(&mut line) {
                Ok(0) | Err(_) => return ConflictChoice::Cancel,
                Ok(_) => {}
            }
            if let Some(choice) = parse_choice(&line) {
                return choice;
            }
        }
        ConflictChoice::Cancel
    }
}

fn parse_choice(input: &str) -> Option<ConflictChoice> {
    match input.trim().to_ascii_lowercase().as_str() {
        "r" | "replace" => Some(ConflictChoice::Replace),
        "p" | "parameters" => Some(ConflictChoice::ReplaceWithParameters),
        "c" | "cancel" | "" => Some(ConflictChoice::Cancel),
        _ => None,
    }
}

/// A project that may or may not be open, plus the prompt used for conflicts
pub struct ProjectHost<P> {
    document: Option<ProjectDocument>,
    prompt: P,
}

impl<P: ConflictPrompt> ProjectHost<P> {
    pub fn new(document: Option<ProjectDocument>, prompt: P) -> Self {
        Self { document, prompt }
    }
}

impl<P: ConflictPrompt> Host for ProjectHost<P> {
    type Document = ProjectDocument;

    fn session(&mut self) -> Option<HostSession<'_, ProjectDocument>> {
        let document = self.document.as_mut()?;
        Some(HostSession {
            document,
            prompt: &mut self.prompt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bimhub_loader::JobLoadOptions;
    use tempfile::tempdir;

    struct Always(ConflictChoice);

    impl ConflictPrompt for Always {
        fn choose(&mut self, _family_name: &str, _family_in_use: bool) -> ConflictChoice {
            self.0
        }
    }

    fn source_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    fn load(
        doc: &mut ProjectDocument,
        path: &Path,
        name: &str,
        choice: ConflictChoice,
    ) -> Result<LoadOutcome, HostError> {
        let mut prompt = Always(choice);
        let mut options = JobLoadOptions::new(true, &mut prompt);
        doc.load_family(
            &LoadRequest {
                path,
                family_name: name,
            },
            &mut options,
        )
    }

    #[test]
    fn test_commit_moves_family_into_place() {
        let project = tempdir().unwrap();
        let downloads = tempdir().unwrap();
        let file = source_file(downloads.path(), "abc123.rfa", "door v1");
        let mut doc = ProjectDocument::open(project.path()).unwrap();

        doc.begin_transaction("Load family").unwrap();
        let outcome = load(&mut doc, &file, "Door", ConflictChoice::Replace).unwrap();
        assert_eq!(
            outcome,
            LoadOutcome::Loaded {
                family_name: "Door".to_string()
            }
        );
        assert!(doc.family_names().unwrap().is_empty());

        doc.commit_transaction().unwrap();
        assert_eq!(doc.family_names().unwrap(), vec!["Door"]);
        assert_eq!(
            fs::read_to_string(doc.families_dir().join("Door.rfa")).unwrap(),
            "door v1"
        );
        assert!(!project.path().join(STAGING_DIR).exists());
        // The cached source file is untouched
        assert!(file.exists());
    }

    #[test]
    fn test_rollback_discards_staged_files() {
        let project = tempdir().unwrap();
        let downloads = tempdir().unwrap();
        let file = source_file(downloads.path(), "abc123.rfa", "door v1");
        let mut doc = ProjectDocument::open(project.path()).unwrap();

        doc.begin_transaction("Load family").unwrap();
        load(&mut doc, &file, "Door", ConflictChoice::Replace).unwrap();
        doc.rollback_transaction().unwrap();

        assert!(doc.family_names().unwrap().is_empty());
        assert!(!project.path().join(STAGING_DIR).exists());
    }

    #[test]
    fn test_existing_family_is_replaced_or_kept() {
        let project = tempdir().unwrap();
        let downloads = tempdir().unwrap();
        let v1 = source_file(downloads.path(), "v1.rfa", "door v1");
        let v2 = source_file(downloads.path(), "v2.rfa", "door v2");
        let mut doc = ProjectDocument::open(project.path()).unwrap();

        doc.begin_transaction("Load family").unwrap();
        load(&mut doc, &v1, "Door", ConflictChoice::Replace).unwrap();
        doc.commit_transaction().unwrap();

        doc.begin_transaction("Load family").unwrap();
        let outcome = load(&mut doc, &v2, "Door", ConflictChoice::Cancel).unwrap();
        assert_eq!(outcome, LoadOutcome::Declined);
        doc.rollback_transaction().unwrap();
        let target = doc.families_dir().join("Door.rfa");
        assert_eq!(fs::read_to_string(&target).unwrap(), "door v1");

        doc.begin_transaction("Load family").unwrap();
        let outcome = load(&mut doc, &v2, "Door", ConflictChoice::ReplaceWithParameters).unwrap();
        assert_eq!(
            outcome,
            LoadOutcome::Updated {
                family_name: "Door".to_string()
            }
        );
        doc.commit_transaction().unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "door v2");
    }

    #[test]
    fn test_nested_transaction_is_rejected() {
        let project = tempdir().unwrap();
        let mut doc = ProjectDocument::open(project.path()).unwrap();

        doc.begin_transaction("Load family").unwrap();
        assert!(matches!(
            doc.begin_transaction("Load family"),
            Err(HostError::Transaction(_))
        ));
    }

    #[test]
    fn test_load_outside_transaction_fails() {
        let project = tempdir().unwrap();
        let downloads = tempdir().unwrap();
        let file = source_file(downloads.path(), "a.rfa", "x");
        let mut doc = ProjectDocument::open(project.path()).unwrap();

        assert!(load(&mut doc, &file, "Door", ConflictChoice::Replace).is_err());
    }

    #[test]
    fn test_family_name_falls_back_and_is_sanitized() {
        let path = PathBuf::from("/cache/0123abcd.rfa");
        assert_eq!(
            family_name(&LoadRequest {
                path: &path,
                family_name: "  "
            }),
            "0123abcd"
        );
        assert_eq!(
            family_name(&LoadRequest {
                path: &path,
                family_name: "Doors/Single: 900"
            }),
            "Doors_Single_ 900"
        );
    }

    #[test]
    fn test_line_prompt_parses_answers() {
        let mut prompt = LinePrompt::new("x\np\n".as_bytes(), Vec::new());
        assert_eq!(
            prompt.choose("Door", false),
            ConflictChoice::ReplaceWithParameters
        );
        let shown = String::from_utf8(prompt.output).unwrap();
        assert_eq!(shown.matches("already exists").count(), 2);

        let mut prompt = LinePrompt::new("R\n".as_bytes(), Vec::new());
        assert_eq!(prompt.choose("Door", true), ConflictChoice::Replace);
        assert!(String::from_utf8(prompt.output).unwrap().contains("in use"));

        let mut prompt = LinePrompt::new("".as_bytes(), Vec::new());
        assert_eq!(prompt.choose("Door", false), ConflictChoice::Cancel);
    }

    #[test]
    fn test_host_without_project_has_no_session() {
        let mut host = ProjectHost::new(None, Always(ConflictChoice::Cancel));
        assert!(host.session().is_none());

        let project = tempdir().unwrap();
        let doc = ProjectDocument::open(project.path()).unwrap();
        let mut host = ProjectHost::new(Some(doc), Always(ConflictChoice::Cancel));
        assert!(host.session().is_some());
    }
}
