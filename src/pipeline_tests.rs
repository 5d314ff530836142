// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `pipeline.rs`

#[cfg(test)]
mod tests {
    use crate::config::{OutputConfig, ProcessorConfig, WatchSpec};
    use crate::errors::{ConfigError, PipelineError, ReconcileError, WatchError};
    use crate::input::KubernetesInput;
    use crate::lifecycle::{CloseSignal, State};
    use crate::message::{Message, Part};
    use crate::output::{KubernetesWriter, WriteMode};
    use crate::pipeline::{run_processors, Stream, StreamConfig};
    use crate::plugin::{Output, Processor};
    use crate::processor::KubernetesProcessor;
    use crate::registry::Registry;
    use crate::testing::{kube_api_error, RecordingClient};
    use crate::transaction::{self, Transaction};
    use crate::watch::{Action, ChangeSource, ObjectCache, ReconcileRequest, Reconciler, WatchTarget};
    use async_trait::async_trait;
    use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
    use serde_json::json;
    use std::io::Write;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    // ========================================================================
    // Fakes
    // ========================================================================

    struct Reject;

    #[async_trait]
    impl Processor for Reject {
        async fn process(&self, _message: Message) -> Result<Vec<Message>, PipelineError> {
            Err(PipelineError::Rejected("not today".to_string()))
        }
    }

    struct FilterAll;

    #[async_trait]
    impl Processor for FilterAll {
        async fn process(&self, _message: Message) -> Result<Vec<Message>, PipelineError> {
            Ok(Vec::new())
        }
    }

    /// One message per part.
    struct Split;

    #[async_trait]
    impl Processor for Split {
        async fn process(&self, message: Message) -> Result<Vec<Message>, PipelineError> {
            Ok(message.into_parts().into_iter().map(Message::single).collect())
        }
    }

    /// Asks for another reconciliation in one minute.
    struct RequeueLater;

    #[async_trait]
    impl Processor for RequeueLater {
        async fn process(&self, mut message: Message) -> Result<Vec<Message>, PipelineError> {
            if let Some(part) = message.get_mut(0) {
                part.set_metadata("requeue_after", "1m");
            }
            Ok(vec![message])
        }
    }

    struct SingleObjectCache(Option<DynamicObject>);

    impl ObjectCache for SingleObjectCache {
        fn get(
            &self,
            _namespace: Option<&str>,
            _name: &str,
        ) -> anyhow::Result<Option<DynamicObject>> {
            Ok(self.0.clone())
        }
    }

    /// Reconciles one request, reports the result, then waits for close.
    struct ScriptedSource {
        request: ReconcileRequest,
        results: mpsc::UnboundedSender<Result<Action, ReconcileError>>,
    }

    #[async_trait]
    impl ChangeSource for ScriptedSource {
        async fn run(
            self: Box<Self>,
            reconciler: Arc<dyn Reconciler>,
            mut close: CloseSignal,
        ) -> Result<(), WatchError> {
            let this = *self;
            let _ = this.results.send(reconciler.reconcile(this.request).await);
            close.closing().await;
            Ok(())
        }
    }

    struct StuckSource;

    #[async_trait]
    impl ChangeSource for StuckSource {
        async fn run(
            self: Box<Self>,
            _reconciler: Arc<dyn Reconciler>,
            _close: CloseSignal,
        ) -> Result<(), WatchError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    /// Fails the way a watch mechanism does when the cluster is unreachable.
    struct UnreachableSource;

    #[async_trait]
    impl ChangeSource for UnreachableSource {
        async fn run(
            self: Box<Self>,
            _reconciler: Arc<dyn Reconciler>,
            _close: CloseSignal,
        ) -> Result<(), WatchError> {
            Err(WatchError::Connect(kube_api_error(503)))
        }
    }

    fn config_map(uid: Option<&str>) -> DynamicObject {
        let resource = ApiResource::from_gvk(&GroupVersionKind::gvk("", "v1", "ConfigMap"));
        let mut object = DynamicObject::new("settings", &resource).within("default");
        object.metadata.uid = uid.map(str::to_string);
        object.data = json!({"data": {"mode": "fast"}});
        object
    }

    fn scripted_input(
        object: Option<DynamicObject>,
    ) -> (
        KubernetesInput,
        mpsc::UnboundedReceiver<Result<Action, ReconcileError>>,
    ) {
        let spec = WatchSpec {
            group: String::new(),
            version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
            namespaces: Vec::new(),
            selector: None,
        };
        let request = ReconcileRequest {
            target: Arc::new(WatchTarget::new(0, spec, Arc::new(SingleObjectCache(object)))),
            namespace: Some("default".to_string()),
            name: "settings".to_string(),
        };
        let (results, results_rx) = mpsc::unbounded_channel();
        let input = KubernetesInput::with_source(Box::new(ScriptedSource { request, results }));
        (input, results_rx)
    }

    fn object_writer(client: &Arc<RecordingClient>) -> Arc<KubernetesWriter> {
        Arc::new(
            KubernetesWriter::with_client(WriteMode::Object, &OutputConfig::default(), client.clone())
                .unwrap(),
        )
    }

    // ========================================================================
    // Processing stage
    // ========================================================================

    #[tokio::test]
    async fn test_processor_error_fails_transaction() {
        let (upstream_tx, upstream_rx) = transaction::channel(1);
        let (downstream_tx, mut downstream_rx) = transaction::channel(1);
        tokio::spawn(run_processors(
            vec![Arc::new(Reject) as Arc<dyn Processor>],
            upstream_rx,
            downstream_tx,
        ));

        let (transaction, outcome) = Transaction::new(Message::single(Part::new("{}")));
        upstream_tx.send(transaction).await.unwrap();

        let outcome = outcome.await.unwrap();
        assert!(matches!(outcome.result, Err(PipelineError::Rejected(_))));

        drop(upstream_tx);
        assert!(downstream_rx.recv().await.is_none(), "nothing reaches the output");
    }

    #[tokio::test]
    async fn test_filtered_message_is_acknowledged() {
        let (upstream_tx, upstream_rx) = transaction::channel(1);
        let (downstream_tx, mut downstream_rx) = transaction::channel(1);
        tokio::spawn(run_processors(
            vec![Arc::new(FilterAll) as Arc<dyn Processor>],
            upstream_rx,
            downstream_tx,
        ));

        let (transaction, outcome) = Transaction::new(Message::single(
            Part::new("{}").with_metadata("requeue_after", "5s"),
        ));
        upstream_tx.send(transaction).await.unwrap();

        let outcome = outcome.await.unwrap();
        assert!(outcome.is_ack());
        assert_eq!(
            outcome.metadata.get("requeue_after").map(String::as_str),
            Some("5s"),
            "the original message's metadata is reported"
        );

        drop(upstream_tx);
        assert!(downstream_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_split_messages_are_joined_in_order() {
        let (upstream_tx, upstream_rx) = transaction::channel(1);
        let (downstream_tx, mut downstream_rx) = transaction::channel(1);
        tokio::spawn(run_processors(
            vec![Arc::new(Split) as Arc<dyn Processor>],
            upstream_rx,
            downstream_tx,
        ));

        let (transaction, outcome) = Transaction::new(Message::new(vec![
            Part::new("a"),
            Part::new("b"),
            Part::new("c"),
        ]));
        upstream_tx.send(transaction).await.unwrap();

        let forwarded = downstream_rx.recv().await.unwrap();
        let payloads: Vec<_> = forwarded
            .payload
            .iter()
            .map(|part| part.payload().to_vec())
            .collect();
        assert_eq!(payloads, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);

        forwarded.ack();
        assert!(outcome.await.unwrap().is_ack(), "the responder travels downstream");
    }

    #[tokio::test]
    async fn test_stopped_output_abandons_transaction() {
        let (upstream_tx, upstream_rx) = transaction::channel(1);
        let (downstream_tx, downstream_rx) = transaction::channel(1);
        drop(downstream_rx);
        let stage = tokio::spawn(run_processors(
            vec![Arc::new(Split) as Arc<dyn Processor>],
            upstream_rx,
            downstream_tx,
        ));

        let (transaction, outcome) = Transaction::new(Message::single(Part::new("a")));
        upstream_tx.send(transaction).await.unwrap();

        assert!(outcome.await.is_err(), "the responder is dropped unanswered");
        stage.await.unwrap();
    }

    // ========================================================================
    // Running streams
    // ========================================================================

    #[tokio::test]
    async fn test_stream_processes_and_writes_object() {
        let client = Arc::new(RecordingClient::default());
        let (input, mut results) = scripted_input(Some(config_map(None)));
        let processor = KubernetesProcessor::with_client(
            &ProcessorConfig {
                operator: "get".to_string(),
                parts: Vec::new(),
            },
            client.clone(),
        )
        .unwrap();
        let writer = object_writer(&client);

        let stream = Stream::new(
            Arc::new(input),
            vec![
                Arc::new(processor) as Arc<dyn Processor>,
                Arc::new(RequeueLater),
            ],
            writer.clone(),
        );
        stream.start().unwrap();

        let action = results.recv().await.unwrap().unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(60)));
        assert_eq!(
            client.operations(),
            vec!["get", "update"],
            "the fetched object carries a UID, so the writer updates it"
        );

        stream.close(Duration::from_secs(1)).await.unwrap();
        assert_eq!(writer.state(), State::Closed);
    }

    #[tokio::test]
    async fn test_stream_without_processors_deletes_gone_object() {
        let client = Arc::new(RecordingClient::default());
        let (input, mut results) = scripted_input(None);
        let stream = Stream::new(Arc::new(input), Vec::new(), object_writer(&client));
        stream.start().unwrap();

        assert_eq!(results.recv().await.unwrap().unwrap(), Action::await_change());
        let calls = client.calls();
        assert_eq!(client.operations(), vec!["delete"]);
        assert_eq!(calls[0].1.name, "settings");
        assert_eq!(calls[0].1.namespace.as_deref(), Some("default"));

        stream.close(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_failure_reaches_watch_mechanism() {
        let client = Arc::new(RecordingClient::default());
        client.fail("settings", 409);
        let (input, mut results) = scripted_input(Some(config_map(Some("abc"))));
        let stream = Stream::new(Arc::new(input), Vec::new(), object_writer(&client));
        stream.start().unwrap();

        let result = results.recv().await.unwrap();
        assert!(matches!(
            result,
            Err(ReconcileError::Pipeline(PipelineError::Client { operation: "update", .. }))
        ));

        stream.close(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_stream_starts_once() {
        let client = Arc::new(RecordingClient::default());
        let (input, _results) = scripted_input(None);
        let stream = Stream::new(Arc::new(input), Vec::new(), object_writer(&client));
        stream.start().unwrap();
        assert!(stream.start().is_err());
        stream.close(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_stuck_input_forces_output_closed() {
        let client = Arc::new(RecordingClient::default());
        let writer = object_writer(&client);
        let stream = Stream::new(
            Arc::new(KubernetesInput::with_source(Box::new(StuckSource))),
            Vec::new(),
            writer.clone(),
        );
        stream.start().unwrap();

        let err = stream.close(Duration::from_millis(50)).await.unwrap_err();
        assert!(err.to_string().contains("Input"), "error: {err}");

        writer
            .wait_for_close(Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(writer.state(), State::Closed);
    }

    #[tokio::test]
    async fn test_input_failure_ends_the_stream() {
        let client = Arc::new(RecordingClient::default());
        let writer = object_writer(&client);
        let stream = Stream::new(
            Arc::new(KubernetesInput::with_source(Box::new(UnreachableSource))),
            Vec::new(),
            writer.clone(),
        );
        stream.start().unwrap();

        let err = tokio::time::timeout(Duration::from_secs(1), stream.wait_input_stopped())
            .await
            .expect("a failed input must be noticed without a shutdown signal")
            .unwrap_err();
        assert!(
            format!("{err:#}").contains("Failed to connect"),
            "error: {err:#}"
        );

        // The output drains once the input's channel ends
        writer
            .wait_for_close(Duration::from_secs(1))
            .await
            .unwrap();
        stream.close(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_input_stops_cleanly() {
        let client = Arc::new(RecordingClient::default());
        let (input, _results) = scripted_input(None);
        let stream = Stream::new(Arc::new(input), Vec::new(), object_writer(&client));
        stream.start().unwrap();
        stream.close(Duration::from_secs(1)).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), stream.wait_input_stopped())
            .await
            .unwrap()
            .unwrap();
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    const STREAM_YAML: &str = r"
input:
  type: kubernetes
  config:
    watches:
      - group: apps
        version: v1
        kind: Deployment
        namespaces: [prod]
pipeline:
  processors:
    - type: kubernetes
      config:
        operator: get
        parts: [-1]
output:
  type: kubernetes_status
";

    #[test]
    fn test_stream_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(STREAM_YAML.as_bytes()).unwrap();

        let config = StreamConfig::from_file(file.path()).unwrap();
        assert_eq!(config.input.name, "kubernetes");
        assert_eq!(config.pipeline.processors.len(), 1);
        assert_eq!(config.output.name, "kubernetes_status");
        assert!(config.output.config.is_null());

        let stream = Stream::build(&config, &Registry::with_builtin());
        assert!(stream.is_ok());
    }

    #[test]
    fn test_missing_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");
        let err = StreamConfig::from_file(&path).unwrap_err();
        assert!(
            err.to_string().contains("absent.yaml"),
            "error should name the file: {err}"
        );
    }

    #[test]
    fn test_unknown_section_is_rejected() {
        let text = format!("{STREAM_YAML}buffer:\n  type: memory\n");
        assert!(StreamConfig::from_yaml_str(&text).is_err());
    }

    #[test]
    fn test_pipeline_section_is_optional() {
        let config = StreamConfig::from_yaml_str(
            "input:\n  type: kubernetes\noutput:\n  type: kubernetes\n",
        )
        .unwrap();
        assert!(config.pipeline.processors.is_empty());
    }

    #[test]
    fn test_build_rejects_unknown_processor() {
        let config = StreamConfig::from_yaml_str(
            r"
input:
  type: kubernetes
  config:
    watches: []
pipeline:
  processors:
    - type: bloblang
output:
  type: kubernetes
",
        )
        .unwrap();
        let result = Stream::build(&config, &Registry::with_builtin());
        assert!(matches!(
            result,
            Err(ConfigError::UnknownPlugin { kind: "processor", name }) if name == "bloblang"
        ));
    }
}
