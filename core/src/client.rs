//! Typed operations over the catalogue's action API.
//!
//! # Design
//! `Client` composes a [`Transport`] with the entity codec and the error
//! interpreter. Every operation follows the same path: build the payload,
//! POST it, decode the `{success, result, error}` envelope, and either
//! return the typed result or surface a [`CkanError`] — a failure is never
//! a silent `None`. The client is stateless between calls apart from the
//! connection config and is generic over its transport so tests can script
//! responses without a network.
//!
//! The two datastore writes wrap this path in a bounded retry loop. The
//! loop's return value is always the outcome of the last attempt actually
//! made; intermediate failures are logged and nothing else.

use std::path::Path;
use std::thread;
use std::time::Duration;

use log::warn;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde_json::{json, Value};

use crate::connection::{Connection, Transport};
use crate::error::{is_html, ActionError, CkanError};
use crate::types::{DataStore, Dataset, Group, Resource, SearchResults};

/// Pause between datastore write attempts. Constant — no jitter, no
/// backoff.
const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Synchronous client for one catalogue session.
///
/// Construct with [`Client::new`] for real use; [`Client::with_transport`]
/// accepts any [`Transport`] implementation. Each operation blocks the
/// calling thread for the duration of the round trip.
#[derive(Debug)]
pub struct Client<T = Connection> {
    transport: T,
    retry_delay: Duration,
}

impl Client<Connection> {
    /// Take ownership of the connection and attach the session's API key.
    pub fn new(mut connection: Connection, api_key: &str) -> Self {
        connection.set_api_key(api_key);
        Self::with_transport(connection)
    }
}

impl<T: Transport> Client<T> {
    pub fn with_transport(transport: T) -> Self {
        Self {
            transport,
            retry_delay: RETRY_DELAY,
        }
    }

    /// Fetch the dataset with the given name or id.
    pub fn get_dataset(&self, name: &str) -> Result<Dataset, CkanError> {
        self.call("package_show", "get_dataset", &id_payload(name))
    }

    /// Delete the dataset with the given name or id.
    pub fn delete_dataset(&self, name: &str) -> Result<(), CkanError> {
        let _: IgnoredAny = self.call("package_delete", "delete_dataset", &id_payload(name))?;
        Ok(())
    }

    /// Create a dataset and return it as the server now holds it.
    pub fn create_dataset(&self, dataset: &Dataset) -> Result<Dataset, CkanError> {
        self.call(
            "package_create",
            "create_dataset",
            &serde_json::to_string(dataset)?,
        )
    }

    /// Create a resource whose content is a URL reference (JSON flow).
    pub fn create_resource(&self, resource: &Resource) -> Result<Resource, CkanError> {
        self.call(
            "resource_create",
            "create_resource",
            &serde_json::to_string(resource)?,
        )
    }

    /// Create a resource by uploading the file at `file_path`.
    ///
    /// Leave the resource id unset to create a new resource; a non-empty id
    /// targets an existing one.
    pub fn upload_create_resource(
        &self,
        resource: &Resource,
        file_path: &Path,
    ) -> Result<Resource, CkanError> {
        let body = self.transport.post_multipart(
            "/api/action/resource_create",
            resource,
            file_path,
        )?;
        decode_envelope(&body, "upload_create_resource")
    }

    /// Update an existing resource by uploading a replacement file.
    pub fn upload_update_resource(
        &self,
        resource: &Resource,
        file_path: &Path,
    ) -> Result<Resource, CkanError> {
        let body = self.transport.post_multipart(
            "/api/action/resource_update",
            resource,
            file_path,
        )?;
        decode_envelope(&body, "upload_update_resource")
    }

    /// Fetch the group with the given name or id.
    pub fn get_group(&self, name: &str) -> Result<Group, CkanError> {
        self.call("group_show", "get_group", &id_payload(name))
    }

    /// Delete the group with the given name or id.
    pub fn delete_group(&self, name: &str) -> Result<(), CkanError> {
        let _: IgnoredAny = self.call("group_delete", "delete_group", &id_payload(name))?;
        Ok(())
    }

    /// Create a group and return it as the server now holds it.
    // TODO: confirm whether this should target group_create; the deployed
    // service has accepted group payloads on package_create so far.
    pub fn create_group(&self, group: &Group) -> Result<Group, CkanError> {
        self.call(
            "package_create",
            "create_group",
            &serde_json::to_string(group)?,
        )
    }

    /// Search datasets with a free-text query. Results arrive in
    /// server-provided order.
    pub fn find_datasets(&self, query: &str) -> Result<SearchResults, CkanError> {
        self.call(
            "package_search",
            "find_datasets",
            &json!({ "q": query }).to_string(),
        )
    }

    /// Create a datastore table, retrying failed attempts up to `attempts`
    /// times. A budget of 0 means a single attempt.
    pub fn create_datastore(
        &self,
        datastore: &DataStore,
        attempts: u32,
    ) -> Result<DataStore, CkanError> {
        self.write_datastore("datastore_create", "create_datastore", datastore, attempts)
    }

    /// Upsert rows into a datastore table, retrying failed attempts up to
    /// `attempts` times.
    pub fn upsert_datastore(
        &self,
        datastore: &DataStore,
        attempts: u32,
    ) -> Result<DataStore, CkanError> {
        self.write_datastore("datastore_upsert", "upsert_datastore", datastore, attempts)
    }

    fn call<R: DeserializeOwned>(
        &self,
        action: &str,
        label: &str,
        payload: &str,
    ) -> Result<R, CkanError> {
        let body = self.transport.post(&format!("/api/action/{action}"), payload)?;
        decode_envelope(&body, label)
    }

    /// Bounded retry loop for the datastore writes.
    ///
    /// The identical request is reissued after a fixed pause while budget
    /// remains; the returned value is always the last attempt's outcome.
    fn write_datastore(
        &self,
        action: &str,
        label: &str,
        datastore: &DataStore,
        mut attempts: u32,
    ) -> Result<DataStore, CkanError> {
        if datastore.fields.iter().any(|field| field.id.is_empty()) {
            return Err(CkanError::EmptyFieldId);
        }
        let payload = serde_json::to_string(datastore)?;
        loop {
            match self.call(action, label, &payload) {
                Ok(result) => return Ok(result),
                Err(err) if attempts > 0 => {
                    attempts -= 1;
                    warn!(
                        "{label} attempt failed ({err}); retrying in {}s ({attempts} retries left)",
                        self.retry_delay.as_secs()
                    );
                    thread::sleep(self.retry_delay);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn id_payload(name: &str) -> String {
    json!({ "id": name }).to_string()
}

/// Decode a response body into the typed payload of a success envelope.
///
/// Detection order is deterministic: an HTML document marker is checked
/// first (the upload endpoints fail with bare fault pages), then the body
/// is parsed as JSON. A `success: false` envelope raises the interpreted
/// [`ActionError`]; a body that is neither HTML nor a parseable envelope is
/// a [`CkanError::Decode`] fault, distinct from a validation failure.
fn decode_envelope<R: DeserializeOwned>(body: &str, action: &str) -> Result<R, CkanError> {
    if is_html(body) {
        return Err(ActionError::from_html(body, action).into());
    }
    let doc: Value = serde_json::from_str(body).map_err(|err| CkanError::Decode {
        action: action.to_string(),
        detail: err.to_string(),
    })?;
    if !doc.get("success").and_then(Value::as_bool).unwrap_or(false) {
        return Err(ActionError::from_document(&doc, action).into());
    }
    let result = doc.get("result").cloned().unwrap_or(Value::Null);
    serde_json::from_value(result).map_err(|err| CkanError::Decode {
        action: action.to_string(),
        detail: format!("result payload: {err}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Field;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::io;
    use std::time::Instant;

    /// Transport double that replays scripted responses and records every
    /// request it sees.
    struct Scripted {
        responses: RefCell<VecDeque<Result<String, CkanError>>>,
        requests: RefCell<Vec<(String, String)>>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<String, CkanError>>) -> Self {
            Self {
                responses: RefCell::new(responses.into()),
                requests: RefCell::new(Vec::new()),
            }
        }

        fn next(&self, path: &str, body: &str) -> Result<String, CkanError> {
            self.requests
                .borrow_mut()
                .push((path.to_string(), body.to_string()));
            self.responses
                .borrow_mut()
                .pop_front()
                .expect("unexpected extra request")
        }
    }

    impl Transport for Scripted {
        fn post(&self, path: &str, body: &str) -> Result<String, CkanError> {
            self.next(path, body)
        }

        fn post_multipart(
            &self,
            path: &str,
            resource: &Resource,
            _file_path: &Path,
        ) -> Result<String, CkanError> {
            self.next(path, &serde_json::to_string(resource).unwrap())
        }
    }

    fn client(responses: Vec<Result<String, CkanError>>) -> Client<Scripted> {
        Client::with_transport(Scripted::new(responses))
    }

    fn network_down() -> CkanError {
        CkanError::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "down"))
    }

    const ERROR_ENVELOPE: &str =
        r#"{"success": false, "error": {"__type": "Validation Error", "resource_id": "Not found"}}"#;

    #[test]
    fn get_dataset_posts_id_payload() {
        let c = client(vec![Ok(
            r#"{"success": true, "result": {"name": "rivers", "title": "Rivers"}}"#.to_string(),
        )]);
        let dataset = c.get_dataset("rivers").unwrap();
        assert_eq!(dataset.name, "rivers");

        let requests = c.transport.requests.borrow();
        assert_eq!(requests[0].0, "/api/action/package_show");
        let body: Value = serde_json::from_str(&requests[0].1).unwrap();
        assert_eq!(body, json!({"id": "rivers"}));
    }

    #[test]
    fn delete_dataset_ignores_result_payload() {
        let c = client(vec![Ok(r#"{"success": true, "result": null}"#.to_string())]);
        c.delete_dataset("rivers").unwrap();
        assert_eq!(c.transport.requests.borrow()[0].0, "/api/action/package_delete");
    }

    #[test]
    fn create_group_targets_package_create() {
        let c = client(vec![Ok(
            r#"{"success": true, "result": {"name": "env", "title": "Environment"}}"#.to_string(),
        )]);
        let group = Group {
            name: "env".to_string(),
            title: "Environment".to_string(),
            ..Group::default()
        };
        let created = c.create_group(&group).unwrap();
        assert_eq!(created.name, "env");
        assert_eq!(c.transport.requests.borrow()[0].0, "/api/action/package_create");
    }

    #[test]
    fn find_datasets_returns_server_ordered_results() {
        let c = client(vec![Ok(r#"{
            "success": true,
            "result": {"count": 2, "results": [{"name": "wq-2023"}, {"name": "wq-2024"}]}
        }"#
        .to_string())]);
        let found = c.find_datasets("water quality").unwrap();
        assert_eq!(found.count, 2);
        assert_eq!(found.results.len(), 2);
        assert_eq!(found.results[0].name, "wq-2023");

        let body: Value =
            serde_json::from_str(&c.transport.requests.borrow()[0].1).unwrap();
        assert_eq!(body, json!({"q": "water quality"}));
    }

    #[test]
    fn failure_envelope_raises_action_error() {
        let c = client(vec![Ok(ERROR_ENVELOPE.to_string())]);
        let err = c.get_dataset("missing").unwrap_err();
        match err {
            CkanError::Action(action) => {
                assert_eq!(action.action, "get_dataset");
                assert_eq!(action.messages, vec!["resource_id - Not found"]);
            }
            other => panic!("expected action error, got {other:?}"),
        }
    }

    #[test]
    fn unparseable_body_is_a_decode_fault() {
        let c = client(vec![Ok("not json at all".to_string())]);
        let err = c.get_dataset("x").unwrap_err();
        assert!(matches!(err, CkanError::Decode { .. }));
    }

    #[test]
    fn empty_body_is_a_decode_fault() {
        let c = client(vec![Ok(String::new())]);
        let err = c.get_dataset("x").unwrap_err();
        assert!(matches!(err, CkanError::Decode { .. }));
    }

    #[test]
    fn mismatched_result_shape_is_a_decode_fault() {
        let c = client(vec![Ok(
            r#"{"success": true, "result": "just a string"}"#.to_string(),
        )]);
        let err = c.get_dataset("x").unwrap_err();
        assert!(matches!(err, CkanError::Decode { .. }));
    }

    #[test]
    fn html_fault_page_surfaces_the_heading() {
        let c = client(vec![Ok(
            "<html><body><h1>Bad Gateway</h1></body></html>".to_string(),
        )]);
        let resource = Resource::default();
        let err = c
            .upload_create_resource(&resource, Path::new("/tmp/ignored.csv"))
            .unwrap_err();
        match err {
            CkanError::Action(action) => {
                assert_eq!(action.messages, vec!["Bad Gateway"]);
                assert_eq!(action.action, "upload_create_resource");
            }
            other => panic!("expected action error, got {other:?}"),
        }
    }

    #[test]
    fn upload_update_targets_resource_update() {
        let c = client(vec![Ok(
            r#"{"success": true, "result": {"id": "r-1", "name": "samples.csv"}}"#.to_string(),
        )]);
        let updated = c
            .upload_update_resource(&Resource::default(), Path::new("/tmp/ignored.csv"))
            .unwrap();
        assert_eq!(updated.id.as_deref(), Some("r-1"));
        assert_eq!(c.transport.requests.borrow()[0].0, "/api/action/resource_update");
    }

    fn sample_table() -> DataStore {
        DataStore {
            resource_id: Some("r-1".to_string()),
            fields: vec![Field::new("station").unwrap()],
            ..DataStore::default()
        }
    }

    #[test]
    fn datastore_retry_returns_the_second_attempts_result() {
        let mut c = client(vec![
            Ok(ERROR_ENVELOPE.to_string()),
            Ok(r#"{"success": true, "result": {"resource_id": "r-1"}}"#.to_string()),
        ]);
        c.retry_delay = Duration::from_millis(200);

        let started = Instant::now();
        let created = c.create_datastore(&sample_table(), 2).unwrap();
        let elapsed = started.elapsed();

        // The retried call's result must reach the caller, after one pause.
        assert_eq!(created.resource_id.as_deref(), Some("r-1"));
        assert_eq!(c.transport.requests.borrow().len(), 2);
        assert!(elapsed >= Duration::from_millis(200), "one pause expected");
        assert!(elapsed < Duration::from_millis(400), "only one pause expected");
    }

    #[test]
    fn datastore_budget_zero_fails_without_sleeping() {
        let c = client(vec![Err(network_down())]);
        let started = Instant::now();
        let err = c.create_datastore(&sample_table(), 0).unwrap_err();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(matches!(err, CkanError::Io(_)));
        assert_eq!(c.transport.requests.borrow().len(), 1);
    }

    #[test]
    fn datastore_exhausted_budget_returns_the_last_attempts_error() {
        let mut c = client(vec![
            Err(network_down()),
            Ok(ERROR_ENVELOPE.to_string()),
        ]);
        c.retry_delay = Duration::from_millis(1);

        let err = c.upsert_datastore(&sample_table(), 1).unwrap_err();
        match err {
            CkanError::Action(action) => assert_eq!(action.action, "upsert_datastore"),
            other => panic!("expected the final attempt's error, got {other:?}"),
        }
        assert_eq!(c.transport.requests.borrow().len(), 2);
    }

    #[test]
    fn datastore_retries_transport_faults_too() {
        let mut c = client(vec![
            Err(network_down()),
            Ok(r#"{"success": true, "result": {"resource_id": "r-1"}}"#.to_string()),
        ]);
        c.retry_delay = Duration::from_millis(1);
        assert!(c.upsert_datastore(&sample_table(), 1).is_ok());
    }

    #[test]
    fn datastore_rejects_empty_field_ids_before_posting() {
        let c = client(vec![]);
        let mut table = sample_table();
        table.fields.push(Field {
            id: String::new(),
            value: None,
        });
        let err = c.create_datastore(&table, 3).unwrap_err();
        assert!(matches!(err, CkanError::EmptyFieldId));
        assert!(c.transport.requests.borrow().is_empty());
    }

    #[test]
    fn datastore_payload_carries_records_in_order() {
        let c = client(vec![Ok(
            r#"{"success": true, "result": {"resource_id": "r-1"}}"#.to_string(),
        )]);
        let mut table = sample_table();
        for i in 0..3 {
            let mut row = crate::types::Record::new();
            row.insert("n".to_string(), json!(i));
            table.records.push(row);
        }
        c.create_datastore(&table, 0).unwrap();

        let body: Value = serde_json::from_str(&c.transport.requests.borrow()[0].1).unwrap();
        assert_eq!(body["records"], json!([{"n": 0}, {"n": 1}, {"n": 2}]));
    }
}
