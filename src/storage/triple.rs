use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::{smallvec, SmallVec};

use crate::model::{Edge, EdgeSide, Node};
use crate::types::{EdgeId, NodeId, Result, StrataError};

/// Separator used inside partitions, predicates and objects.
pub const SEP: char = '|';
/// Predicate and object of a node record triple.
pub const NODE_RECORD: &str = "node";
/// Predicate of the type-index triple ordered by id.
pub const ID_PREDICATE: &str = "id";

/// Index position of a triple: `(partition, object, subject, predicate)`.
///
/// Field order matters: the derived ordering is the scan order.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct TripleKey {
    /// Partition the triple lives in.
    pub partition: String,
    /// Indexed object.
    pub object: String,
    /// Subject.
    pub subject: String,
    /// Predicate.
    pub predicate: String,
}

/// Identity of a row: `(partition, subject, predicate)`.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PrimaryKey {
    /// Partition.
    pub partition: String,
    /// Subject.
    pub subject: String,
    /// Predicate.
    pub predicate: String,
}

/// Subject/predicate/object fact stored in a partition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Triple {
    /// Partition.
    pub partition: String,
    /// Subject.
    pub subject: String,
    /// Predicate.
    pub predicate: String,
    /// Indexed object.
    pub object: String,
    /// Entity payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Version of the entity the triple belongs to, when versioned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

impl Triple {
    /// Index key of the triple.
    pub fn key(&self) -> TripleKey {
        TripleKey {
            partition: self.partition.clone(),
            object: self.object.clone(),
            subject: self.subject.clone(),
            predicate: self.predicate.clone(),
        }
    }

    /// Primary key of the triple.
    pub fn primary_key(&self) -> PrimaryKey {
        PrimaryKey {
            partition: self.partition.clone(),
            subject: self.subject.clone(),
            predicate: self.predicate.clone(),
        }
    }
}

/// Partition holding the type index of `type_name`.
pub fn type_partition(type_name: &str) -> String {
    format!("type{SEP}{type_name}")
}

/// Object prefix for scans of a type index ordered by id.
pub fn id_prefix() -> String {
    format!("{ID_PREDICATE}{SEP}")
}

/// Object prefix for scans of a type index ordered by a property.
pub fn prop_prefix(name: &str) -> String {
    format!("prop{SEP}{name}{SEP}")
}

/// Primary key of the record triple for a node.
pub fn node_record_key(id: &NodeId) -> PrimaryKey {
    PrimaryKey {
        partition: id.to_string(),
        subject: id.to_string(),
        predicate: NODE_RECORD.to_owned(),
    }
}

/// Index key of the record triple for a node.
pub fn node_record_index_key(id: &NodeId) -> TripleKey {
    TripleKey {
        partition: id.to_string(),
        object: NODE_RECORD.to_owned(),
        subject: id.to_string(),
        predicate: NODE_RECORD.to_owned(),
    }
}

/// Decomposes a node into its record triple and, unless soft-deleted, its type-index triples.
pub fn node_triples(node: &Node) -> Result<Vec<Triple>> {
    let data = serde_json::to_value(node)?;
    let version = Some(node.version());
    let id = node.id.to_string();
    let mut triples = vec![Triple {
        partition: id.clone(),
        subject: id.clone(),
        predicate: NODE_RECORD.to_owned(),
        object: NODE_RECORD.to_owned(),
        data: Some(data.clone()),
        version,
    }];
    if node.is_deleted() {
        return Ok(triples);
    }
    let partition = type_partition(node.type_name());
    triples.push(Triple {
        partition: partition.clone(),
        subject: id.clone(),
        predicate: ID_PREDICATE.to_owned(),
        object: format!("{}{id}", id_prefix()),
        data: Some(data.clone()),
        version,
    });
    for (name, value) in &node.props {
        let Some(encoded) = encode_scalar(value) else {
            continue;
        };
        triples.push(Triple {
            partition: partition.clone(),
            subject: id.clone(),
            predicate: format!("prop{SEP}{name}"),
            object: format!("{}{encoded}", prop_prefix(name)),
            data: Some(data.clone()),
            version,
        });
    }
    Ok(triples)
}

/// Rendered subject shared by both triples of an edge.
pub fn edge_subject(id: &EdgeId) -> String {
    format!("{}{SEP}{}{SEP}{}", id.edge_type, id.in_id, id.out_id)
}

/// Object (and predicate) of the edge triple stored on `side`'s partition.
pub fn edge_object(side: EdgeSide, id: &EdgeId) -> String {
    let other = match side {
        EdgeSide::In => &id.out_id,
        EdgeSide::Out => &id.in_id,
    };
    format!("{}{}{SEP}{other}", side_tag(side), id.edge_type)
}

fn side_tag(side: EdgeSide) -> String {
    match side {
        EdgeSide::In => format!("in{SEP}"),
        EdgeSide::Out => format!("out{SEP}"),
    }
}

/// Object prefix selecting the edges hanging off a node on `side`.
///
/// `edge_type` narrows to one type; `endpoint_type` additionally narrows to
/// edges whose opposite endpoint has that node type.
pub fn edge_prefix(side: EdgeSide, edge_type: Option<&str>, endpoint_type: Option<&str>) -> String {
    let mut prefix = side_tag(side);
    if let Some(edge_type) = edge_type {
        prefix.push_str(edge_type);
        prefix.push(SEP);
        if let Some(endpoint_type) = endpoint_type {
            prefix.push_str(endpoint_type);
            prefix.push(crate::types::NODE_ID_SEPARATOR);
        }
    }
    prefix
}

/// Primary keys of both triples of an edge.
pub fn edge_primary_keys(id: &EdgeId) -> SmallVec<[PrimaryKey; 2]> {
    let subject = edge_subject(id);
    smallvec![
        PrimaryKey {
            partition: id.in_id.to_string(),
            subject: subject.clone(),
            predicate: edge_object(EdgeSide::In, id),
        },
        PrimaryKey {
            partition: id.out_id.to_string(),
            subject,
            predicate: edge_object(EdgeSide::Out, id),
        },
    ]
}

/// Index key of the edge triple on the `in` partition.
pub fn edge_in_index_key(id: &EdgeId) -> TripleKey {
    let object = edge_object(EdgeSide::In, id);
    TripleKey {
        partition: id.in_id.to_string(),
        object: object.clone(),
        subject: edge_subject(id),
        predicate: object,
    }
}

/// Decomposes an edge into one triple per endpoint partition.
pub fn edge_triples(edge: &Edge) -> Result<SmallVec<[Triple; 2]>> {
    let id = edge.id();
    let data = serde_json::to_value(edge)?;
    let subject = edge_subject(&id);
    let mut triples = SmallVec::new();
    for side in [EdgeSide::In, EdgeSide::Out] {
        let object = edge_object(side, &id);
        triples.push(Triple {
            partition: side.endpoint(edge).to_string(),
            subject: subject.clone(),
            predicate: object.clone(),
            object,
            data: Some(data.clone()),
            version: None,
        });
    }
    Ok(triples)
}

/// Rebuilds a node from any of its triples.
pub fn decode_node(triple: &Triple) -> Result<Node> {
    let data = triple
        .data
        .as_ref()
        .ok_or_else(|| StrataError::Storage(format!("node triple {} has no data", triple.subject)))?;
    Ok(serde_json::from_value(data.clone())?)
}

/// Rebuilds an edge from either of its triples.
pub fn decode_edge(triple: &Triple) -> Result<Edge> {
    let data = triple
        .data
        .as_ref()
        .ok_or_else(|| StrataError::Storage(format!("edge triple {} has no data", triple.subject)))?;
    Ok(serde_json::from_value(data.clone())?)
}

/// Order-preserving text encoding of a scalar JSON value; `None` for arrays, objects and null.
pub fn encode_scalar(value: &Value) -> Option<String> {
    match value {
        Value::Bool(b) => Some(format!("b{SEP}{}", u8::from(*b))),
        Value::Number(n) => n.as_f64().map(|f| format!("n{SEP}{}", encode_f64(f))),
        Value::String(s) => Some(format!("s{SEP}{s}")),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn encode_f64(value: f64) -> String {
    let bits = value.to_bits();
    let ordered = if bits >> 63 == 1 {
        !bits
    } else {
        bits ^ (1 << 63)
    };
    hex::encode(ordered.to_be_bytes())
}
