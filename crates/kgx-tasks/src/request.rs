//! Task creation requests and their validation
//!
//! Validation happens before a task exists: a rejected request leaves the
//! registry untouched.

use crate::config::ServiceConfig;
use crate::error::TaskError;
use crate::types::MaterialId;
use kgx_llm::{ModelConfig, ProviderFactory};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const ACCEPTED_EXTENSION: &str = "txt";

/// One input file as supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileSpec {
    /// Correlation id echoed back in results
    #[serde(default)]
    pub material_id: Option<MaterialId>,

    /// Local path, bare filename in the upload directory, or URL
    pub location: String,
}

impl FileSpec {
    /// A file without a material id
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            material_id: None,
            location: location.into(),
        }
    }

    /// Attach a material id
    pub fn with_material_id(mut self, material_id: MaterialId) -> Self {
        self.material_id = Some(material_id);
        self
    }
}

/// Request to create an extraction task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRequest {
    /// Input files, processed in this order
    pub files: Vec<FileSpec>,
    /// Extraction prompt sent with every chunk
    pub prompt: String,
    /// Provider and credentials for this task
    pub model: ModelConfig,
}

/// How a file location is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileReference {
    /// Absolute or relative filesystem path
    Path,
    /// Bare filename inside the upload directory
    UploadName,
    /// `http(s)://` URL
    Remote,
}

impl FileReference {
    /// Classify a location string
    ///
    /// # Examples
    ///
    /// ```
    /// use kgx_tasks::FileReference;
    ///
    /// assert_eq!(FileReference::classify("/data/a.txt"), FileReference::Path);
    /// assert_eq!(FileReference::classify("a.txt"), FileReference::UploadName);
    /// assert_eq!(FileReference::classify("https://x.org/a.txt"), FileReference::Remote);
    /// ```
    pub fn classify(location: &str) -> Self {
        let lower = location.trim().to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            FileReference::Remote
        } else if location.contains('/') || location.contains('\\') {
            FileReference::Path
        } else {
            FileReference::UploadName
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            FileReference::Path => "local path",
            FileReference::UploadName => "uploaded filename",
            FileReference::Remote => "remote URL",
        }
    }
}

/// An input file after validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    /// Correlation id from the request
    pub material_id: Option<MaterialId>,
    /// Where the file is read from
    pub path: PathBuf,
    /// File name reported in results
    pub file_name: String,
}

impl TaskRequest {
    /// Create a request
    pub fn new(files: Vec<FileSpec>, prompt: impl Into<String>, model: ModelConfig) -> Self {
        Self {
            files,
            prompt: prompt.into(),
            model,
        }
    }

    /// Validate the request and resolve every file location
    pub fn validate<F: ProviderFactory>(
        &self,
        config: &ServiceConfig,
        factory: &F,
    ) -> Result<Vec<ResolvedFile>, TaskError> {
        if self.files.is_empty() {
            return Err(TaskError::Validation("File list is empty".to_string()));
        }
        if self.files.len() > config.max_files_per_task {
            return Err(TaskError::Validation(format!(
                "Too many files: {} (maximum {})",
                self.files.len(),
                config.max_files_per_task
            )));
        }
        if self.prompt.trim().is_empty() {
            return Err(TaskError::Validation("Prompt is empty".to_string()));
        }

        factory
            .validate(&self.model)
            .map_err(|e| TaskError::Validation(e.to_string()))?;

        let kind = FileReference::classify(&self.files[0].location);
        if let Some(other) = self
            .files
            .iter()
            .map(|f| FileReference::classify(&f.location))
            .find(|k| *k != kind)
        {
            return Err(TaskError::Validation(format!(
                "File references must all be of one kind, found {} and {}",
                kind.describe(),
                other.describe()
            )));
        }

        if kind == FileReference::Remote {
            return Err(TaskError::Validation(
                "Remote acquisition is not configured".to_string(),
            ));
        }

        self.files
            .iter()
            .map(|spec| resolve_file(spec, kind, &config.upload_dir))
            .collect()
    }
}

fn resolve_file(
    spec: &FileSpec,
    kind: FileReference,
    upload_dir: &Path,
) -> Result<ResolvedFile, TaskError> {
    let location = spec.location.trim();
    if location.is_empty() {
        return Err(TaskError::Validation("File location is empty".to_string()));
    }

    let path = match kind {
        FileReference::UploadName => {
            if location == "." || location == ".." {
                return Err(TaskError::Validation(format!(
                    "Invalid file name: {}",
                    location
                )));
            }
            upload_dir.join(location)
        }
        _ => PathBuf::from(location),
    };

    let has_accepted_extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(ACCEPTED_EXTENSION));
    if !has_accepted_extension {
        return Err(TaskError::Validation(format!(
            "Unsupported file type: {} (only .{} is accepted)",
            location, ACCEPTED_EXTENSION
        )));
    }

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| location.to_string());

    Ok(ResolvedFile {
        material_id: spec.material_id.clone(),
        path,
        file_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgx_llm::{MockProvider, ProviderKind, StaticProviderFactory};

    fn factory() -> StaticProviderFactory<MockProvider> {
        StaticProviderFactory::new(MockProvider::default())
    }

    fn request(locations: &[&str]) -> TaskRequest {
        TaskRequest::new(
            locations.iter().map(|l| FileSpec::new(*l)).collect(),
            "Extract triples",
            ModelConfig::for_provider(ProviderKind::DeepSeek),
        )
    }

    fn validation_message(result: Result<Vec<ResolvedFile>, TaskError>) -> String {
        match result {
            Err(TaskError::Validation(message)) => message,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_upload_names_resolve_against_upload_dir() {
        let config = ServiceConfig {
            upload_dir: PathBuf::from("/srv/uploads"),
            ..ServiceConfig::default()
        };
        let mut req = request(&["a.txt", "b.TXT"]);
        req.files[1].material_id = Some(MaterialId::Number(9));

        let files = req.validate(&config, &factory()).unwrap();
        assert_eq!(files[0].path, PathBuf::from("/srv/uploads/a.txt"));
        assert_eq!(files[1].file_name, "b.TXT");
        assert_eq!(files[1].material_id, Some(MaterialId::Number(9)));
    }

    #[test]
    fn test_paths_keep_their_location() {
        let files = request(&["/data/in/one.txt", "rel/two.txt"])
            .validate(&ServiceConfig::default(), &factory())
            .unwrap();
        assert_eq!(files[0].path, PathBuf::from("/data/in/one.txt"));
        assert_eq!(files[0].file_name, "one.txt");
        assert_eq!(files[1].file_name, "two.txt");
    }

    #[test]
    fn test_empty_list_rejected() {
        let message = validation_message(request(&[]).validate(&ServiceConfig::default(), &factory()));
        assert!(message.contains("empty"));
    }

    #[test]
    fn test_too_many_files_rejected() {
        let config = ServiceConfig {
            max_files_per_task: 2,
            ..ServiceConfig::default()
        };
        let message = validation_message(request(&["a.txt", "b.txt", "c.txt"]).validate(&config, &factory()));
        assert!(message.contains("Too many files"));
    }

    #[test]
    fn test_blank_prompt_rejected() {
        let mut req = request(&["a.txt"]);
        req.prompt = "  \n".to_string();
        let message = validation_message(req.validate(&ServiceConfig::default(), &factory()));
        assert!(message.contains("Prompt"));
    }

    #[test]
    fn test_mixed_kinds_rejected() {
        let message = validation_message(
            request(&["a.txt", "/data/b.txt"]).validate(&ServiceConfig::default(), &factory()),
        );
        assert!(message.contains("one kind"));
    }

    #[test]
    fn test_remote_rejected() {
        let message = validation_message(
            request(&["https://example.org/a.txt"]).validate(&ServiceConfig::default(), &factory()),
        );
        assert!(message.contains("Remote"));
    }

    #[test]
    fn test_extension_checked() {
        let message = validation_message(request(&["report.pdf"]).validate(&ServiceConfig::default(), &factory()));
        assert!(message.contains("Unsupported file type"));
        assert!(request(&["README"]).validate(&ServiceConfig::default(), &factory()).is_err());
    }

    #[test]
    fn test_dot_names_rejected() {
        assert!(request(&[".."]).validate(&ServiceConfig::default(), &factory()).is_err());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let mut req = request(&["a.txt"]);
        req.model.provider = "openai-classic".to_string();
        let message = validation_message(req.validate(&ServiceConfig::default(), &factory()));
        assert!(message.contains("openai-classic"));
    }

    #[test]
    fn test_file_spec_deserializes_without_material_id() {
        let spec: FileSpec = serde_json::from_str(r#"{"location": "a.txt"}"#).unwrap();
        assert_eq!(spec, FileSpec::new("a.txt"));
    }
}
