//! Dispatcher - routes JSON-RPC methods to the registry and sessions
//!
//! One `Dispatcher` is shared by every connection. Read methods take a
//! registry read hold for the duration of the call; `publish_epoch` is
//! the only writer and is serialized on the mirror graph lock, so epochs
//! are installed and fanned out to sessions in arrival order.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::batch::{EdgeBatch, VertexId};
use crate::column::{ColumnValue, TypedColumnView};
use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::graph::{GraphHandle, MemoryGraph};
use crate::metrics::{Method, Metrics};
use crate::params::{self, ParamSpec, ParamValue};
use crate::protocol::{RpcRequest, RpcResponse};
use crate::registry::{AlgorithmRegistry, AlgorithmSet, AlgorithmState, RegistryReader};
use crate::schema::Schema;
use crate::session::{CommunitySubgraph, SessionId, SessionManager};
use crate::shm::SharedBuffer;

/// Session type accepted by `register`.
pub const COMMUNITY_SUBGRAPH: &str = "community_subgraph";

/// Graph image named by a publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphLocation {
    pub location: String,
    /// Bytes to map; 0 records the location without mapping it
    #[serde(default)]
    pub size: u64,
}

/// One algorithm's output buffer in a publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlgorithmLocation {
    pub name: String,
    pub description: String,
    pub location: String,
    /// Defaults to the width implied by `description`
    #[serde(default)]
    pub data_per_vertex: Option<usize>,
}

/// Parameters of `publish_epoch`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EpochUpdate {
    #[serde(default)]
    pub graph: Option<GraphLocation>,
    #[serde(default)]
    pub algorithms: Vec<AlgorithmLocation>,
    #[serde(default)]
    pub batch: EdgeBatch,
    /// Vertex names bound before the batch is applied
    #[serde(default)]
    pub vertex_names: BTreeMap<String, VertexId>,
}

pub struct Dispatcher {
    config: ServerConfig,
    registry: Arc<AlgorithmRegistry>,
    sessions: SessionManager,
    /// Live graph mirrored from published batches
    mirror: Mutex<MemoryGraph>,
    metrics: Option<Arc<Metrics>>,
}

impl Dispatcher {
    pub fn new(config: ServerConfig, registry: Arc<AlgorithmRegistry>, metrics: Option<Arc<Metrics>>) -> Self {
        Self {
            sessions: SessionManager::new(config.session_timeout()),
            mirror: Mutex::new(MemoryGraph::new(config.max_vertices)),
            config,
            registry,
            metrics,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &AlgorithmRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Execute one request, recording metrics when enabled.
    pub fn handle(&self, request: &RpcRequest) -> RpcResponse {
        let start = Instant::now();
        let result = self.call(&request.method, &request.params);
        let duration_ms = start.elapsed().as_millis() as u64;

        if duration_ms >= self.config.slow_request_ms {
            tracing::warn!(method = %request.method, duration_ms, "slow request");
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_request(Method::from_name(&request.method), duration_ms, result.is_ok());
        }

        match result {
            Ok(value) => RpcResponse::success(request.id.clone(), value),
            Err(e) => {
                tracing::debug!(method = %request.method, code = e.code(), "request failed: {}", e);
                RpcResponse::failure(request.id.clone(), &e)
            }
        }
    }

    pub fn call(&self, method: &str, params: &Value) -> Result<Value> {
        match method {
            "get_server_info" => self.get_server_info(),
            "get_algorithms" => self.get_algorithms(),
            "get_data_description" => self.get_data_description(params),
            "get_data_array_range" => self.get_data_array_range(params),
            "get_data_array_set" => self.get_data_array_set(params),
            "register" => self.register(params),
            "request" => self.request(params),
            "unregister" => self.unregister(params),
            "publish_epoch" => {
                if !self.config.allow_ingest {
                    return Err(ServerError::IngestDisabled);
                }
                let update: EpochUpdate = serde_json::from_value(params.clone())
                    .map_err(|e| ServerError::InvalidParameter(format!("publish_epoch: {}", e)))?;
                self.publish_epoch(&update)
            }
            other => Err(ServerError::MethodNotFound(other.to_string())),
        }
    }

    fn get_server_info(&self) -> Result<Value> {
        let reader = self.registry.acquire_read();
        let graph = reader.graph().map(|g| {
            json!({
                "location": g.location(),
                "size": g.size(),
                "vertices": g.store().vertex_count(),
                "edges": g.store().edge_count(),
            })
        });

        let mut info = json!({
            "version": env!("CARGO_PKG_VERSION"),
            "epoch": reader.epoch(),
            "graph": graph,
            "algorithms": reader.list_algorithms(),
            "sessions": self.sessions.len(),
        });
        if let Some(metrics) = &self.metrics {
            info["metrics"] = serde_json::to_value(metrics.snapshot())?;
        }
        Ok(info)
    }

    fn get_algorithms(&self) -> Result<Value> {
        Ok(json!({ "algorithms": self.registry.acquire_read().list_algorithms() }))
    }

    fn get_data_description(&self, params: &Value) -> Result<Value> {
        let bound = params::bind(&[ParamSpec::string("name")], params, None)?;
        let name = bound.str("name")?;

        let reader = self.registry.acquire_read();
        let alg = reader.require_alg(name)?;
        let schema = Schema::parse(&alg.data_description)?;
        let columns: Vec<Value> = schema
            .columns
            .iter()
            .map(|(column, t)| json!({ "name": column, "type": t.type_name() }))
            .collect();

        Ok(json!({
            "name": alg.name,
            "description": alg.data_description,
            "columns": columns,
        }))
    }

    fn get_data_array_range(&self, params: &Value) -> Result<Value> {
        let specs = [
            ParamSpec::string("name"),
            ParamSpec::string("data"),
            ParamSpec::int("offset").optional(ParamValue::Int(0)),
            ParamSpec::int("count"),
            ParamSpec::boolean("strings").optional(ParamValue::Bool(false)),
        ];
        let bound = params::bind(&specs, params, None)?;
        let (offset, count) = (bound.int("offset")?, bound.int("count")?);
        if offset < 0 || count < 0 {
            return Err(ServerError::InvalidParameter(format!(
                "offset {} and count {} must be non-negative",
                offset, count
            )));
        }

        let reader = self.registry.acquire_read();
        let view = column_view(&reader, bound.str("name")?, bound.str("data")?)?;

        let start = (offset as usize).min(view.len());
        let end = start.saturating_add(count as usize).min(view.len());
        let ids: Vec<VertexId> = (start..end).map(|v| v as VertexId).collect();

        let mut result = json!({
            "offset": start,
            "count": ids.len(),
            "vertex_id": ids,
            "value": values(&view, &ids),
        });
        if bound.bool("strings")? {
            let graph = reader.require_graph()?.store();
            result["vertex_str"] = json!(ids.iter().map(|&v| graph.vertex_name(v)).collect::<Vec<_>>());
        }
        Ok(result)
    }

    fn get_data_array_set(&self, params: &Value) -> Result<Value> {
        let reader = self.registry.acquire_read();
        let specs = [
            ParamSpec::string("name"),
            ParamSpec::string("data"),
            ParamSpec::array("set"),
        ];
        let bound = params::bind(&specs, params, reader.graph().map(|g| g.store()))?;

        let view = column_view(&reader, bound.str("name")?, bound.str("data")?)?;
        let ids = bound.array("set")?;
        if let Some(bad) = ids.iter().find(|&&v| v < 0 || v as usize >= view.len()) {
            return Err(ServerError::InvalidParameter(format!(
                "vertex {} outside 0..{}",
                bad,
                view.len()
            )));
        }

        Ok(json!({
            "vertex_id": ids,
            "value": values(&view, ids),
        }))
    }

    fn register(&self, params: &Value) -> Result<Value> {
        let specs = [
            ParamSpec::string("type").optional(ParamValue::Str(COMMUNITY_SUBGRAPH.to_string())),
            ParamSpec::string("name"),
            ParamSpec::string("data"),
            ParamSpec::int("source"),
        ];
        let bound = params::bind(&specs, params, None)?;
        let kind = bound.str("type")?;
        if kind != COMMUNITY_SUBGRAPH {
            return Err(ServerError::InvalidParameter(format!("unknown session type '{}'", kind)));
        }

        let session = CommunitySubgraph::new(bound.str("name")?, bound.str("data")?, bound.int("source")?);
        let (id, subgraph) = self.sessions.register(session, &self.registry.acquire_read())?;
        Ok(json!({ "session_id": id, "subgraph": subgraph }))
    }

    fn request(&self, params: &Value) -> Result<Value> {
        let delta = self.sessions.poll(session_id(params)?)?;
        Ok(serde_json::to_value(delta)?)
    }

    fn unregister(&self, params: &Value) -> Result<Value> {
        self.sessions.unregister(session_id(params)?)?;
        Ok(json!({ "ok": true }))
    }

    /// Install a new epoch and feed its batch to every session.
    ///
    /// Buffers are mapped before anything changes, so a publication that
    /// fails to map leaves the previous epoch in place.
    pub fn publish_epoch(&self, update: &EpochUpdate) -> Result<Value> {
        let algs = self.map_algorithms(&update.algorithms)?;
        let graph_mapping = match &update.graph {
            Some(g) if g.size > 0 => Some(SharedBuffer::map(&g.location, g.size as usize)?),
            _ => None,
        };

        let mut mirror = self.mirror.lock().unwrap_or_else(PoisonError::into_inner);
        for (name, id) in &update.vertex_names {
            mirror.map_vertex(name, *id)?;
        }
        let skipped = mirror.apply_batch(&update.batch);

        let graph = update.graph.as_ref().map(|g| {
            let handle = GraphHandle::new(g.location.clone(), g.size, Box::new(mirror.clone()));
            match graph_mapping {
                Some(mapping) => handle.with_mapping(mapping),
                None => handle,
            }
        });
        self.registry.update_algs(graph, Some(algs));

        let reader = self.registry.acquire_read();
        let failed = self.sessions.apply_batch(&reader, &update.batch);
        tracing::info!(
            epoch = reader.epoch(),
            insertions = update.batch.insertions.len(),
            deletions = update.batch.deletions.len(),
            skipped,
            "epoch published"
        );

        Ok(json!({
            "epoch": reader.epoch(),
            "skipped": skipped,
            "session_failures": failed,
        }))
    }

    fn map_algorithms(&self, locations: &[AlgorithmLocation]) -> Result<AlgorithmSet> {
        let vertices = self.config.max_vertices;
        let mut algs = Vec::with_capacity(locations.len());
        for loc in locations {
            let per_vertex = match loc.data_per_vertex {
                Some(n) => n,
                None => Schema::parse(&loc.description)?.bytes_per_vertex(),
            };
            let size = per_vertex.checked_mul(vertices).ok_or_else(|| {
                ServerError::ResourceExhausted(format!("buffer size overflow for '{}'", loc.name))
            })?;
            let data = SharedBuffer::map(&loc.location, size)?;
            algs.push(AlgorithmState::new(&loc.name, &loc.description, data, per_vertex, vertices)?);
        }
        Ok(AlgorithmSet::new(algs))
    }

    /// Remove idle sessions; returns the ids removed.
    pub fn sweep(&self, now: Instant) -> Vec<SessionId> {
        self.sessions.sweep_expired(now)
    }
}

fn column_view<'r>(reader: &'r RegistryReader<'_>, name: &str, column: &str) -> Result<TypedColumnView<'r>> {
    let alg = reader.require_alg(name)?;
    alg.column_layout(column)?.bind(alg.data())
}

fn values(view: &TypedColumnView<'_>, ids: &[VertexId]) -> Vec<ColumnValue> {
    ids.iter().map(|&v| view.get(v as usize)).collect()
}

fn session_id(params: &Value) -> Result<SessionId> {
    let bound = params::bind(&[ParamSpec::int("session_id")], params, None)?;
    let id = bound.int("session_id")?;
    SessionId::try_from(id).map_err(|_| ServerError::SessionNotFound(id as u64))
}

#[cfg(test)]
mod dispatch_tests {
    use super::*;
    use crate::error::rpc_codes;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Label column file for `labels`, padded to `vertices` entries.
    fn label_file(labels: &[i64], vertices: usize) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for i in 0..vertices {
            let v = labels.get(i).copied().unwrap_or(-1 - i as i64);
            file.write_all(&v.to_ne_bytes()).unwrap();
        }
        file.flush().unwrap();
        file
    }

    fn dispatcher(vertices: usize) -> Dispatcher {
        let config = ServerConfig {
            max_vertices: vertices,
            allow_ingest: true,
            ..ServerConfig::default()
        };
        Dispatcher::new(config, Arc::new(AlgorithmRegistry::new()), Some(Arc::new(Metrics::new(100))))
    }

    fn publish(d: &Dispatcher, file: &NamedTempFile, batch: EdgeBatch) -> Value {
        let update = EpochUpdate {
            graph: Some(GraphLocation { location: "graph-img".into(), size: 0 }),
            algorithms: vec![AlgorithmLocation {
                name: "cc".into(),
                description: "l label".into(),
                location: file.path().to_str().unwrap().into(),
                data_per_vertex: None,
            }],
            batch,
            vertex_names: BTreeMap::new(),
        };
        d.publish_epoch(&update).unwrap()
    }

    /// The 4-vertex fixture: edges 0-1, 1-2, 2-3 both ways; labels [1,1,2,2].
    fn four_vertex() -> (Dispatcher, NamedTempFile) {
        let d = dispatcher(4);
        let file = label_file(&[1, 1, 2, 2], 4);
        let mut batch = EdgeBatch::new();
        for (s, t) in [(0, 1), (1, 2), (2, 3)] {
            batch = batch.insert(s, t).insert(t, s);
        }
        publish(&d, &file, batch);
        (d, file)
    }

    #[test]
    fn test_server_info_before_publish() {
        let d = dispatcher(4);
        let info = d.call("get_server_info", &Value::Null).unwrap();
        assert_eq!(info["epoch"], json!(0));
        assert_eq!(info["graph"], Value::Null);
        assert_eq!(info["algorithms"], json!([]));
    }

    #[test]
    fn test_server_info_after_publish() {
        let (d, _file) = four_vertex();
        let info = d.call("get_server_info", &Value::Null).unwrap();
        assert_eq!(info["epoch"], json!(1));
        assert_eq!(info["graph"]["edges"], json!(6));
        assert_eq!(info["algorithms"], json!(["cc"]));
    }

    #[test]
    fn test_data_description() {
        let (d, _file) = four_vertex();
        let result = d.call("get_data_description", &json!({"name": "cc"})).unwrap();
        assert_eq!(result["columns"], json!([{"name": "label", "type": "int64"}]));

        let err = d.call("get_data_description", &json!({"name": "pagerank"})).unwrap_err();
        assert!(matches!(err, ServerError::AlgorithmNotRunning(_)));
    }

    #[test]
    fn test_data_array_range_clamps() {
        let (d, _file) = four_vertex();
        let result = d
            .call("get_data_array_range", &json!({"name": "cc", "data": "label", "offset": 2, "count": 10}))
            .unwrap();
        assert_eq!(result["vertex_id"], json!([2, 3]));
        assert_eq!(result["value"], json!([2, 2]));
        assert_eq!(result["count"], json!(2));
    }

    #[test]
    fn test_data_array_range_negative_offset() {
        let (d, _file) = four_vertex();
        let err = d
            .call("get_data_array_range", &json!({"name": "cc", "data": "label", "offset": -1, "count": 1}))
            .unwrap_err();
        assert_eq!(err.rpc_code(), rpc_codes::INVALID_PARAMS);
    }

    #[test]
    fn test_data_array_set_with_names() {
        let d = dispatcher(4);
        let file = label_file(&[5, 6, 7, 8], 4);
        let mut update = EpochUpdate {
            graph: Some(GraphLocation { location: "g".into(), size: 0 }),
            algorithms: vec![AlgorithmLocation {
                name: "cc".into(),
                description: "l label".into(),
                location: file.path().to_str().unwrap().into(),
                data_per_vertex: Some(8),
            }],
            ..EpochUpdate::default()
        };
        update.vertex_names.insert("carol".into(), 2);
        d.publish_epoch(&update).unwrap();

        let result = d
            .call("get_data_array_set", &json!({"name": "cc", "data": "label", "set": [3, "carol"]}))
            .unwrap();
        assert_eq!(result["vertex_id"], json!([3, 2]));
        assert_eq!(result["value"], json!([8, 7]));

        let err = d
            .call("get_data_array_set", &json!({"name": "cc", "data": "label", "set": ["dave"]}))
            .unwrap_err();
        assert!(matches!(err, ServerError::UnresolvedVertexName { index: 0, .. }));
    }

    #[test]
    fn test_register_request_unregister() {
        let (d, file) = four_vertex();
        let result = d
            .call("register", &json!({"type": "community_subgraph", "name": "cc", "data": "label", "source": 0}))
            .unwrap();
        assert_eq!(result["subgraph"], json!([[0, 1], [1, 0]]));
        let id = result["session_id"].as_u64().unwrap();

        publish(&d, &file, EdgeBatch::new().delete(1, 0));
        let delta = d.call("request", &json!({"session_id": id})).unwrap();
        assert_eq!(delta["deletions"], json!([[1, 0]]));
        assert_eq!(delta["insertions"], json!([]));

        assert_eq!(d.call("unregister", &json!({"session_id": id})).unwrap(), json!({"ok": true}));
        let err = d.call("request", &json!({"session_id": id})).unwrap_err();
        assert!(matches!(err, ServerError::SessionNotFound(_)));
    }

    #[test]
    fn test_register_unknown_type() {
        let (d, _file) = four_vertex();
        let err = d
            .call("register", &json!({"type": "bfs", "name": "cc", "data": "label", "source": 0}))
            .unwrap_err();
        assert!(matches!(err, ServerError::InvalidParameter(_)));
    }

    #[test]
    fn test_publish_requires_ingest() {
        let d = Dispatcher::new(ServerConfig::default(), Arc::new(AlgorithmRegistry::new()), None);
        let err = d.call("publish_epoch", &json!({})).unwrap_err();
        assert!(matches!(err, ServerError::IngestDisabled));
    }

    #[test]
    fn test_publish_failure_keeps_previous_epoch() {
        let (d, _file) = four_vertex();
        let update = EpochUpdate {
            algorithms: vec![AlgorithmLocation {
                name: "cc".into(),
                description: "l label".into(),
                location: "/nonexistent/dir/buffer".into(),
                data_per_vertex: None,
            }],
            ..EpochUpdate::default()
        };
        assert!(d.publish_epoch(&update).is_err());
        assert_eq!(d.registry().epoch(), 1);
        assert!(d.registry().acquire_read().has_alg("cc"));
    }

    #[test]
    fn test_handle_wraps_errors_and_records_metrics() {
        let (d, _file) = four_vertex();
        let response = d.handle(&RpcRequest::new(9, "no_such_method", Value::Null));
        assert_eq!(response.id, json!(9));
        assert_eq!(response.error.unwrap().code, rpc_codes::METHOD_NOT_FOUND);

        let response = d.handle(&RpcRequest::new(10, "get_algorithms", Value::Null));
        assert_eq!(response.result.unwrap(), json!({"algorithms": ["cc"]}));

        let info = d.call("get_server_info", &Value::Null).unwrap();
        assert_eq!(info["metrics"]["request_count"], json!(2));
        assert_eq!(info["metrics"]["error_count"], json!(1));
    }

    #[test]
    fn test_sweep_removes_idle_sessions() {
        let (d, _file) = four_vertex();
        d.call("register", &json!({"name": "cc", "data": "label", "source": 3})).unwrap();
        assert!(d.sweep(Instant::now()).is_empty());
        let later = Instant::now() + d.config().session_timeout() * 2;
        assert_eq!(d.sweep(later).len(), 1);
        assert!(d.sessions().is_empty());
    }
}
