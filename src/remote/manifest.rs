//! Remote manifest wire format.
//!
//! A remote advertises its contents as a JSON array of package summaries.
//! Build numbers must compare as integers; peers have historically emitted
//! them both as JSON numbers and as strings, so deserialization accepts
//! either and normalizes to `u64`.

use serde::{Deserialize, Deserializer, Serialize};

/// One package summary advertised by a remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Content-derived package identity.
    pub uid: String,
    /// Integer version counter.
    #[serde(deserialize_with = "lenient_build")]
    pub build: u64,
    /// Filename the package currently has on the remote.
    pub filename: String,
    /// SHA-256 checksum of the package file.
    pub checksum: String,
}

/// A remote's full advertised package list.
pub type RemoteManifest = Vec<ManifestEntry>;

/// Accepts a build number encoded as a JSON integer or as a decimal string.
fn lenient_build<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let value = serde_json::Value::deserialize(deserializer)?;
    match &value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| D::Error::custom(format!("build `{n}` is not a non-negative integer"))),
        serde_json::Value::String(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| D::Error::custom(format!("build `{s}` is not an integer"))),
        other => Err(D::Error::custom(format!(
            "build must be an integer or string, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_build_parses() {
        let entry: ManifestEntry = serde_json::from_str(
            r#"{"uid":"u1","build":3,"filename":"a.zip","checksum":"ff"}"#,
        )
        .unwrap();
        assert_eq!(entry.build, 3);
    }

    #[test]
    fn test_string_build_normalizes_to_integer() {
        let entry: ManifestEntry = serde_json::from_str(
            r#"{"uid":"u1","build":"12","filename":"a.zip","checksum":"ff"}"#,
        )
        .unwrap();
        assert_eq!(entry.build, 12);
    }

    #[test]
    fn test_non_numeric_build_is_rejected() {
        let res: Result<ManifestEntry, _> = serde_json::from_str(
            r#"{"uid":"u1","build":"new","filename":"a.zip","checksum":"ff"}"#,
        );
        assert!(res.is_err());
    }

    #[test]
    fn test_manifest_array_round_trip() {
        let json = r#"[
            {"uid":"u1","build":1,"filename":"a.zip","checksum":"aa"},
            {"uid":"u2","build":"2","filename":"b.zip","checksum":"bb"}
        ]"#;
        let manifest: RemoteManifest = serde_json::from_str(json).unwrap();
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest[1].build, 2);

        let out = serde_json::to_string(&manifest).unwrap();
        let back: RemoteManifest = serde_json::from_str(&out).unwrap();
        assert_eq!(back, manifest);
    }
}
