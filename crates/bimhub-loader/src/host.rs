//! Interface to the host document that families are loaded into
//!
//! The host owns a document that may only be mutated from one thread. The
//! gateway's runner is the only caller of these traits and always calls them
//! on that thread.

use std::fmt;
use std::path::Path;

/// Failure reported by the host while loading a family
#[derive(Debug)]
pub enum HostError {
    Transaction(String),
    Load(String),
    Io(Box<std::io::Error>),
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostError::Transaction(msg) => write!(f, "transaction error: {}", msg),
            HostError::Load(msg) => write!(f, "{}", msg),
            HostError::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for HostError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HostError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for HostError {
    fn from(err: std::io::Error) -> Self {
        HostError::Io(Box::new(err))
    }
}

/// What the host should load
#[derive(Debug, Clone, Copy)]
pub struct LoadRequest<'a> {
    pub path: &'a Path,
    /// Family name from the catalog; may be empty, in which case the host
    /// names the family itself
    pub family_name: &'a str,
}

/// Result of a load attempt inside an open transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The family did not exist before
    Loaded { family_name: String },
    /// An existing family was replaced
    Updated { family_name: String },
    /// The family exists and the load options chose to keep it
    Declined,
}

/// Answer to "this family already exists"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwriteDecision {
    KeepExisting,
    Overwrite { parameter_values: bool },
}

/// Which copy of a shared nested family survives a load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharedFamilySource {
    /// The copy nested in the family being loaded
    Family,
    /// The copy already in the project
    Project,
}

/// Answer to "a shared family nested in the loaded one already exists"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedFamilyDecision {
    pub source: SharedFamilySource,
    pub parameter_values: bool,
}

/// Callbacks the host consults when the target family or one of its shared
/// nested families already exists
pub trait FamilyLoadOptions {
    fn on_family_found(&mut self, family_name: &str, family_in_use: bool) -> OverwriteDecision;

    fn on_shared_family_found(
        &mut self,
        family_name: &str,
        family_in_use: bool,
    ) -> SharedFamilyDecision;
}

/// Choices offered to the user when a family already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictChoice {
    /// Replace the existing version
    Replace,
    /// Replace the existing version and its parameter values
    ReplaceWithParameters,
    Cancel,
}

/// User-facing prompt shown for interactive loads
pub trait ConflictPrompt {
    fn choose(&mut self, family_name: &str, family_in_use: bool) -> ConflictChoice;
}

/// A document that accepts family loads inside transactions
pub trait HostDocument {
    fn begin_transaction(&mut self, name: &str) -> Result<(), HostError>;

    fn commit_transaction(&mut self) -> Result<(), HostError>;

    fn rollback_transaction(&mut self) -> Result<(), HostError>;

    fn load_family(
        &mut self,
        request: &LoadRequest<'_>,
        options: &mut dyn FamilyLoadOptions,
    ) -> Result<LoadOutcome, HostError>;
}

/// Active document together with the UI used to prompt the user
pub struct HostSession<'a, D> {
    pub document: &'a mut D,
    pub prompt: &'a mut dyn ConflictPrompt,
}

/// The application hosting the document
pub trait Host {
    type Document: HostDocument;

    /// `None` when no document is open
    fn session(&mut self) -> Option<HostSession<'_, Self::Document>>;
}

/// Load options derived from a job's interactive flag
pub struct JobLoadOptions<'a> {
    interactive: bool,
    prompt: &'a mut dyn ConflictPrompt,
}

impl<'a> JobLoadOptions<'a> {
    pub fn new(interactive: bool, prompt: &'a mut dyn ConflictPrompt) -> Self {
        Self {
            interactive,
            prompt,
        }
    }
}

impl FamilyLoadOptions for JobLoadOptions<'_> {
    fn on_family_found(&mut self, family_name: &str, family_in_use: bool) -> OverwriteDecision {
        if !self.interactive {
            return OverwriteDecision::Overwrite {
                parameter_values: true,
            };
        }

        match self.prompt.choose(family_name, family_in_use) {
            ConflictChoice::Replace => OverwriteDecision::Overwrite {
                parameter_values: false,
            },
            ConflictChoice::ReplaceWithParameters => OverwriteDecision::Overwrite {
                parameter_values: true,
            },
            ConflictChoice::Cancel => OverwriteDecision::KeepExisting,
        }
    }

    /// Nested shared families always come from the loaded family, never
    /// prompting
    fn on_shared_family_found(
        &mut self,
        _family_name: &str,
        _family_in_use: bool,
    ) -> SharedFamilyDecision {
        SharedFamilyDecision {
            source: SharedFamilySource::Family,
            parameter_values: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedPrompt {
        choice: ConflictChoice,
        asked: usize,
    }

    impl ConflictPrompt for FixedPrompt {
        fn choose(&mut self, _family_name: &str, _family_in_use: bool) -> ConflictChoice {
            self.asked += 1;
            self.choice
        }
    }

    #[test]
    fn test_silent_options_overwrite_without_prompting() {
        let mut prompt = FixedPrompt {
            choice: ConflictChoice::Cancel,
            asked: 0,
        };
        let mut options = JobLoadOptions::new(false, &mut prompt);

        assert_eq!(
            options.on_family_found("Door", true),
            OverwriteDecision::Overwrite {
                parameter_values: true
            }
        );
        assert_eq!(prompt.asked, 0);
    }

    #[test]
    fn test_interactive_options_map_choices() {
        let cases = [
            (
                ConflictChoice::Replace,
                OverwriteDecision::Overwrite {
                    parameter_values: false,
                },
            ),
            (
                ConflictChoice::ReplaceWithParameters,
                OverwriteDecision::Overwrite {
                    parameter_values: true,
                },
            ),
            (ConflictChoice::Cancel, OverwriteDecision::KeepExisting),
        ];

        for (choice, expected) in cases {
            let mut prompt = FixedPrompt { choice, asked: 0 };
            let mut options = JobLoadOptions::new(true, &mut prompt);
            assert_eq!(options.on_family_found("Door", false), expected);
            assert_eq!(prompt.asked, 1);
        }
    }

    #[test]
    fn test_shared_families_come_from_loaded_family() {
        let expected = SharedFamilyDecision {
            source: SharedFamilySource::Family,
            parameter_values: true,
        };

        for interactive in [true, false] {
            let mut prompt = FixedPrompt {
                choice: ConflictChoice::Cancel,
                asked: 0,
            };
            let mut options = JobLoadOptions::new(interactive, &mut prompt);
            assert_eq!(options.on_shared_family_found("Hinge", true), expected);
            assert_eq!(options.on_shared_family_found("Handle", false), expected);
            assert_eq!(prompt.asked, 0);
        }
    }

    #[test]
    fn test_host_error_display() {
        assert_eq!(
            HostError::Transaction("already open".to_string()).to_string(),
            "transaction error: already open"
        );
        assert_eq!(HostError::Load("corrupt file".to_string()).to_string(), "corrupt file");
    }
}
