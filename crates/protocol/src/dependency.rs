use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

/// Where a dependency's bytes come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum SourceKind {
    /// Plain URL download.
    #[default]
    #[serde(rename = "simple")]
    Simple,
    /// URL download with a bearer token.
    #[serde(rename = "civitai")]
    Civitai,
    /// One named file from the job backend.
    #[serde(rename = "kg7-lora")]
    BackendLora,
    /// Many named files from the job backend, sharing a name prefix.
    #[serde(rename = "kg7-file")]
    BackendFiles,
}

impl SourceKind {
    /// Case-insensitive lookup of a wire name.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "simple" => Some(Self::Simple),
            "civitai" => Some(Self::Civitai),
            "kg7-lora" => Some(Self::BackendLora),
            "kg7-file" => Some(Self::BackendFiles),
            _ => None,
        }
    }
}

/// `null` and `""` read as [`SourceKind::Simple`]; anything unrecognised is
/// an error.
impl<'de> Deserialize<'de> for SourceKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Option::<String>::deserialize(deserializer)?.as_deref() {
            None => Ok(Self::default()),
            Some(name) if name.trim().is_empty() => Ok(Self::default()),
            Some(name) => Self::parse(name)
                .ok_or_else(|| de::Error::custom(format!("unknown url_type: {name}"))),
        }
    }
}

/// Model directory a dependency installs into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    Loras,
    Checkpoints,
    Vae,
    TextEncoders,
    DiffusionModels,
    Upscale,
    Input,
}

impl DependencyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loras => "loras",
            Self::Checkpoints => "checkpoints",
            Self::Vae => "vae",
            Self::TextEncoders => "text_encoders",
            Self::DiffusionModels => "diffusion_models",
            Self::Upscale => "upscale",
            Self::Input => "input",
        }
    }
}

/// One entry of a task payload's `dependency` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    #[serde(default, deserialize_with = "crate::lenient::null_as_default")]
    pub url: String,
    #[serde(default)]
    pub url_type: SourceKind,
    #[serde(
        rename = "type",
        default,
        deserialize_with = "crate::lenient::null_as_default"
    )]
    pub kind: String,
    #[serde(
        default,
        deserialize_with = "crate::lenient::null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl Dependency {
    /// Resolves `type` case-insensitively. `None` for an unknown directory.
    pub fn target_kind(&self) -> Option<DependencyKind> {
        serde_json::from_value(serde_json::Value::String(self.kind.to_lowercase())).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_type_defaults_to_simple() {
        let dep: Dependency =
            serde_json::from_str(r#"{"url": "https://h/a.safetensors", "type": "loras"}"#).unwrap();
        assert_eq!(dep.url_type, SourceKind::Simple);
        assert_eq!(dep.target_kind(), Some(DependencyKind::Loras));
    }

    #[test]
    fn backend_files_variant() {
        let dep: Dependency = serde_json::from_str(
            r#"{"url": "train/42/", "url_type": "kg7-file", "type": "input", "files": ["a.png", "b.png"]}"#,
        )
        .unwrap();
        assert_eq!(dep.url_type, SourceKind::BackendFiles);
        assert_eq!(dep.files.len(), 2);
    }

    #[test]
    fn target_kind_is_case_insensitive() {
        let dep: Dependency =
            serde_json::from_str(r#"{"url": "u", "type": "Text_Encoders"}"#).unwrap();
        assert_eq!(dep.target_kind(), Some(DependencyKind::TextEncoders));
    }

    #[test]
    fn unknown_type_resolves_to_none() {
        let dep: Dependency = serde_json::from_str(r#"{"url": "u", "type": "embeddings"}"#).unwrap();
        assert!(dep.target_kind().is_none());
    }

    #[test]
    fn unknown_url_type_is_rejected() {
        let err = serde_json::from_str::<Dependency>(r#"{"url": "u", "type": "vae", "url_type": "ftp"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("unknown url_type: ftp"), "{err}");
        assert!(serde_json::from_str::<Dependency>(r#"{"url": "u", "type": "vae", "url_type": 3}"#).is_err());
    }

    #[test]
    fn null_fields_fall_back_to_defaults() {
        let dep: Dependency = serde_json::from_str(
            r#"{"url": "https://h/a.bin", "type": "vae", "url_type": null, "files": null, "file_name": null}"#,
        )
        .unwrap();
        assert_eq!(dep.url_type, SourceKind::Simple);
        assert!(dep.files.is_empty());
        assert!(dep.file_name.is_none());

        let dep: Dependency = serde_json::from_str(r#"{"url": "u", "type": "vae", "url_type": ""}"#).unwrap();
        assert_eq!(dep.url_type, SourceKind::Simple);
    }

    #[test]
    fn url_type_is_case_insensitive() {
        for (raw, kind) in [
            ("Civitai", SourceKind::Civitai),
            ("KG7-LORA", SourceKind::BackendLora),
            ("Kg7-File", SourceKind::BackendFiles),
            ("SIMPLE", SourceKind::Simple),
        ] {
            let json = format!(r#"{{"url": "u", "type": "loras", "url_type": "{raw}"}}"#);
            let dep: Dependency = serde_json::from_str(&json).unwrap();
            assert_eq!(dep.url_type, kind, "{raw}");
        }
    }

    #[test]
    fn missing_url_or_type_reads_as_empty() {
        let dep: Dependency = serde_json::from_str(r#"{"type": "vae", "url": null}"#).unwrap();
        assert!(dep.url.is_empty());
        let dep: Dependency = serde_json::from_str(r#"{"url": "u"}"#).unwrap();
        assert!(dep.kind.is_empty());
    }

    #[test]
    fn serializes_wire_names() {
        let dep = Dependency {
            url: "p/".into(),
            url_type: SourceKind::BackendFiles,
            kind: "input".into(),
            files: vec!["a.png".into()],
            file_name: None,
        };
        let value = serde_json::to_value(&dep).unwrap();
        assert_eq!(value["url_type"], "kg7-file");
        assert_eq!(value["type"], "input");
        let back: Dependency = serde_json::from_value(value).unwrap();
        assert_eq!(back, dep);
    }
}
