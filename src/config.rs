use crate::post::{PostOp, default_post};
use serde::{Deserialize, Serialize};

fn default_stdout() -> bool {
    true
}

fn default_jobs() -> usize {
    16
}

/// Options every split worker is initialised with
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SplitOptions {
    /// Write features to the output sink as they are produced
    #[serde(default = "default_stdout")]
    pub stdout: bool,
    /// ISO country code attached as `carmen:geocoder_stack`
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default = "default_post")]
    pub post: Vec<PostOp>,
    /// Keep interpolation internals on output features
    #[serde(default)]
    pub debug: bool,
    /// Clusters processed concurrently inside one batch
    #[serde(default = "default_jobs")]
    pub jobs: usize,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            stdout: default_stdout(),
            country: None,
            post: default_post(),
            debug: false,
            jobs: default_jobs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_fields_take_defaults() {
        let options: SplitOptions = serde_json::from_value(json!({})).unwrap();
        assert_eq!(options, SplitOptions::default());
        assert_eq!(options.jobs, 16);
        assert_eq!(options.post, vec![PostOp::Props]);
    }

    #[test]
    fn unknown_post_op_is_rejected() {
        let parsed: Result<SplitOptions, _> = serde_json::from_value(json!({ "post": ["nope"] }));
        assert!(parsed.is_err());
    }
}
