use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
};

pub const DEFAULT_CLASS_COUNT: usize = 6;

/// Ordered class taxonomy. Slot order defines the meaning of every
/// `DetectionCounts` index, so the list is loaded once at startup and never
/// changes afterwards.
#[derive(Debug)]
pub struct ClassCatalog {
    names: Vec<String>,
}

impl ClassCatalog {
    /// Loads the catalog from a newline-separated label file. A missing,
    /// unreadable or empty file falls back to a fixed set of anonymous
    /// classes so the counts vector keeps a stable width.
    pub fn load(labels_path: Option<&Path>) -> Self {
        if let Some(path) = labels_path {
            match load_class_names(path) {
                Ok(names) if !names.is_empty() => {
                    tracing::info!("Loaded {} class labels from {:?}", names.len(), path);
                    return Self { names };
                }
                Ok(_) => {
                    tracing::warn!("Label file {:?} is empty, using fallback classes", path);
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to read label file {:?}: {}, using fallback classes",
                        path,
                        e
                    );
                }
            }
        }
        Self::anonymous(DEFAULT_CLASS_COUNT)
    }

    fn anonymous(count: usize) -> Self {
        Self {
            names: (0..count).map(|i| format!("class{}", i)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn name(&self, class_id: usize) -> Option<&str> {
        self.names.get(class_id).map(String::as_str)
    }
}

fn load_class_names(filepath: &Path) -> io::Result<Vec<String>> {
    let file = File::open(filepath)?;
    let reader = io::BufReader::new(file);
    let mut names = Vec::new();

    for line_result in reader.lines() {
        let line = line_result?;
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            names.push(trimmed.to_string());
        }
    }

    Ok(names)
}
