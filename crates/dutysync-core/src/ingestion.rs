use blake3::Hasher;
use dutysync_parser::{parse_file, ParsedFile};
use tracing::{error, info, warn};

use crate::files::PendingFile;

#[derive(Debug)]
pub enum FileLoad {
    Parsed(ParsedFile),
    /// Could not be read or decoded; the file stays for the next cycle.
    Failed(String),
}

#[derive(Debug)]
pub struct LoadedFile {
    pub file: PendingFile,
    pub hash: Option<String>,
    pub load: FileLoad,
}

impl LoadedFile {
    pub fn parsed(&self) -> Option<&ParsedFile> {
        match &self.load {
            FileLoad::Parsed(parsed) => Some(parsed),
            FileLoad::Failed(_) => None,
        }
    }
}

/// Reads and parses every admitted file. A failing file never affects the
/// others.
pub fn load_files(files: Vec<PendingFile>) -> Vec<LoadedFile> {
    files.into_iter().map(load_file).collect()
}

fn load_file(file: PendingFile) -> LoadedFile {
    let contents = match std::fs::read(&file.path) {
        Ok(contents) => contents,
        Err(err) => {
            error!(file = %file.name, error = %err, "Failed to read CSV file");
            return LoadedFile {
                file,
                hash: None,
                load: FileLoad::Failed(format!("read error: {err}")),
            };
        }
    };

    let hash = compute_hash(&contents);
    let load = match parse_file(&contents) {
        Ok(parsed) => {
            for rejected in &parsed.rejected {
                warn!(
                    file = %file.name,
                    line = rejected.line,
                    error = %rejected.error,
                    "Skipping malformed row"
                );
            }
            info!(
                file = %file.name,
                records = parsed.records.len(),
                rejected = parsed.rejected.len(),
                "Parsed CSV file"
            );
            FileLoad::Parsed(parsed)
        }
        Err(err) => {
            error!(file = %file.name, error = %err, "Failed to parse CSV file");
            FileLoad::Failed(err.to_string())
        }
    };

    LoadedFile {
        file,
        hash: Some(hash),
        load,
    }
}

fn compute_hash(contents: &[u8]) -> String {
    let mut hasher = Hasher::new();
    hasher.update(contents);
    hasher.finalize().to_hex().to_string()
}
