use crate::config::SplitOptions;
use crate::explode::{Explode, NetworkExploder};
use crate::interpolate::{InterpolateOptions, Interpolator, TigerInterpolator};
use crate::post::Post;
use crate::resolver::ClusterResolver;
use crate::sink::{OutputSink, SinkError};
use crate::types::{SplitFeat, display_names};
use geojson::Feature;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum SplitError {
    #[error("could not write cluster {id}: {source}")]
    Output { id: i64, source: SinkError },
}

/// Per-cluster driver: match, interpolate, post process, emit.
/// Holds everything a worker needs so nothing lives in globals.
#[derive(Clone)]
pub struct Split {
    options: SplitOptions,
    post: Post,
    exploder: Arc<dyn NetworkExploder>,
    interpolator: Arc<dyn Interpolator>,
    sink: Arc<OutputSink>,
}

impl Split {
    pub fn new(
        options: SplitOptions,
        exploder: Arc<dyn NetworkExploder>,
        interpolator: Arc<dyn Interpolator>,
        sink: Arc<OutputSink>,
    ) -> Self {
        Self {
            post: Post::new(&options.post),
            options,
            exploder,
            interpolator,
            sink,
        }
    }

    pub fn with_defaults(options: SplitOptions, sink: Arc<OutputSink>) -> Self {
        Self::new(options, Arc::new(Explode), Arc::new(TigerInterpolator), sink)
    }

    pub fn options(&self) -> &SplitOptions {
        &self.options
    }

    pub fn split_cluster(&self, feat: &mut SplitFeat) -> Vec<Feature> {
        if !feat.has_display_name() {
            debug!(cluster_id = feat.id, "no usable display name, skipping");
            return Vec::new();
        }

        feat.sort_address();

        let segments = ClusterResolver::new(self.exploder.as_ref()).resolve(feat);
        let interpolate_options = InterpolateOptions {
            debug: self.options.debug,
        };
        let text = serde_json::to_value(display_names(&feat.names)).unwrap_or(Value::Null);

        let features: Vec<Feature> = segments
            .iter()
            .filter_map(|segment| self.interpolator.interpolate(segment, &interpolate_options))
            .map(|mut feature| {
                let properties = feature.properties.get_or_insert_with(Default::default);
                properties.insert("carmen:text".into(), text.clone());
                if let Some(country) = &self.options.country {
                    properties.insert("carmen:geocoder_stack".into(), Value::from(country.as_str()));
                }
                self.post.feat(feature)
            })
            .collect();

        debug!(
            cluster_id = feat.id,
            segments = segments.len(),
            features = features.len(),
            "split cluster"
        );

        features
    }

    /// Split one cluster and write its features to the sink as a single block.
    /// Returns the number of features produced.
    pub async fn process(&self, mut feat: SplitFeat) -> Result<usize, SplitError> {
        let features = self.split_cluster(&mut feat);

        if self.options.stdout {
            self.sink
                .write_records(&features)
                .await
                .map_err(|source| SplitError::Output {
                    id: feat.id,
                    source,
                })?;
        }

        Ok(features.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Segment, SplitFeatRecord};
    use serde_json::json;
    use std::sync::Mutex;

    /// Accepts every segment and remembers the house numbers it was given
    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<Vec<String>>>,
    }

    impl Interpolator for Recording {
        fn interpolate(&self, segment: &Segment, _options: &InterpolateOptions) -> Option<Feature> {
            self.seen
                .lock()
                .unwrap()
                .push(segment.numbers().iter().map(|n| n.to_string()).collect());

            Some(Feature {
                bbox: None,
                geometry: Some(geojson::Geometry::new(geojson::Value::from(&segment.network))),
                id: None,
                properties: Some(Default::default()),
                foreign_members: None,
            })
        }
    }

    fn feat(names: Value, network: Value, address: &[(f64, f64, &str)]) -> SplitFeat {
        let coordinates: Vec<Value> = address
            .iter()
            .enumerate()
            .map(|(i, (x, y, _))| json!([x, y, i + 1]))
            .collect();
        let props: Vec<Value> = address
            .iter()
            .enumerate()
            .map(|(i, (_, _, number))| json!({ "id": i + 1, "number": number }))
            .collect();

        let record: SplitFeatRecord = serde_json::from_value(json!({
            "names": names,
            "network": network,
            "address": { "type": "MultiPoint", "coordinates": coordinates },
            "address_props": props
        }))
        .unwrap();

        record.into_split_feat(42).unwrap()
    }

    fn main_street() -> Value {
        json!([
            { "tokenized": "main st", "tokenless": "main", "display": "Main Street" },
            { "tokenized": "", "tokenless": "", "display": "  " }
        ])
    }

    fn straight() -> SplitFeat {
        feat(
            main_street(),
            json!({ "type": "LineString", "coordinates": [[0.0, 0.0], [0.01, 0.0]] }),
            &[
                (0.008, 0.0001, "16"),
                (0.002, 0.0001, "10"),
                (0.006, 0.0001, "14"),
                (0.004, 0.0001, "12"),
            ],
        )
    }

    fn recording_split(options: SplitOptions, sink: Arc<OutputSink>) -> (Split, Arc<Recording>) {
        let recording = Arc::new(Recording::default());
        let split = Split::new(
            options,
            Arc::new(Explode),
            Arc::clone(&recording) as Arc<dyn Interpolator>,
            sink,
        );
        (split, recording)
    }

    #[test]
    fn straight_line_gives_one_ordered_segment() {
        let (split, recording) = recording_split(
            SplitOptions {
                country: Some("us".into()),
                ..SplitOptions::default()
            },
            Arc::new(OutputSink::memory()),
        );

        let features = split.split_cluster(&mut straight());

        assert_eq!(features.len(), 1);
        assert_eq!(
            *recording.seen.lock().unwrap(),
            vec![vec!["10", "12", "14", "16"]]
        );

        let properties = features[0].properties.as_ref().unwrap();
        assert_eq!(
            properties["carmen:text"],
            json!([{ "tokenized": "main st", "tokenless": "main", "display": "Main Street" }])
        );
        assert_eq!(properties["carmen:geocoder_stack"], json!("us"));
    }

    #[test]
    fn branching_duplicates_give_two_segments() {
        let (split, recording) =
            recording_split(SplitOptions::default(), Arc::new(OutputSink::memory()));

        let mut feat = feat(
            main_street(),
            json!({
                "type": "MultiLineString",
                "coordinates": [
                    [[0.0, 0.0], [0.05, 0.0]],
                    [[0.05, 0.0], [0.1, 0.0]],
                    [[0.05, 0.0], [0.05, 0.05]]
                ]
            }),
            &[(0.025, 0.0001, "10"), (0.075, 0.0001, "10")],
        );

        let features = split.split_cluster(&mut feat);

        assert_eq!(features.len(), 2);
        let seen = recording.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|numbers| numbers == &vec!["10".to_string()]));
    }

    #[test]
    fn blank_names_produce_nothing() {
        let (split, recording) =
            recording_split(SplitOptions::default(), Arc::new(OutputSink::memory()));

        let mut feat = feat(
            json!([{ "display": "" }, { "display": "   " }]),
            json!({ "type": "LineString", "coordinates": [[0.0, 0.0], [0.01, 0.0]] }),
            &[(0.002, 0.0001, "10"), (0.004, 0.0001, "12")],
        );

        assert!(split.split_cluster(&mut feat).is_empty());
        assert!(recording.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn process_writes_one_record_per_feature() {
        let sink = Arc::new(OutputSink::memory());
        let split = Split::with_defaults(SplitOptions::default(), Arc::clone(&sink));

        let written = split.process(straight()).await.unwrap();

        assert_eq!(written, 1);
        let records = sink.records().await;
        assert_eq!(records.len(), 1);

        let feature: Value = serde_json::from_str(&records[0]).unwrap();
        assert_eq!(feature["properties"]["carmen:rangetype"], json!("tiger"));
        assert_eq!(feature["properties"]["carmen:lfromhn"], json!([10, null]));
        assert_eq!(feature["properties"]["carmen:ltohn"], json!([16, null]));
    }

    #[tokio::test]
    async fn process_without_stdout_only_counts() {
        let sink = Arc::new(OutputSink::memory());
        let split = Split::with_defaults(
            SplitOptions {
                stdout: false,
                ..SplitOptions::default()
            },
            Arc::clone(&sink),
        );

        assert_eq!(split.process(straight()).await.unwrap(), 1);
        assert!(sink.records().await.is_empty());
    }
}
