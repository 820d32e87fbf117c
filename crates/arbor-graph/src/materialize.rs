//! Turning raw result payloads into typed entity handles.

use arbor_core::wire::BatchResult;
use arbor_core::EntityKind;
use serde_json::Value;

use crate::client::GraphClient;
use crate::entity::{Entity, Index, Node, Relationship};
use crate::error::{GraphError, Result};

/// A raw result: decoded body plus whatever batch metadata came with it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Payload<'a> {
    pub body: Option<&'a Value>,
    pub location: Option<&'a str>,
    pub from: Option<&'a str>,
}

impl<'a> Payload<'a> {
    pub fn from_body(body: Option<&'a Value>) -> Self {
        Self {
            body,
            ..Default::default()
        }
    }

    pub fn from_result(result: &'a BatchResult) -> Self {
        Self {
            body: result.body.as_ref(),
            location: result.location.as_deref(),
            from: result.from.as_deref(),
        }
    }

    /// The `self` URL of the body, else the location.
    pub fn identity(&self) -> Option<&'a str> {
        self.body
            .and_then(|b| b.get("self"))
            .and_then(Value::as_str)
            .or(self.location)
    }
}

/// Infer a result's kind from its shape.
///
/// Only used when the operation carries no recorded kind.
pub fn classify(payload: &Payload<'_>) -> EntityKind {
    let identity = payload.identity().unwrap_or_default();
    let from = payload.from.unwrap_or_default();
    let index_identity = identity.contains("/index/");

    if !index_identity {
        if identity.contains("/relationship/") {
            return EntityKind::Relationship;
        }
        if identity.contains("/node/") {
            return EntityKind::Node;
        }
    }
    if matches!(payload.body, Some(Value::Array(_))) {
        return EntityKind::Iterable;
    }
    if index_identity || from.contains("index") {
        if identity.contains("index/relationship") || from.contains("index/relationship") {
            return EntityKind::IndexRelationship;
        }
        return EntityKind::IndexNode;
    }
    EntityKind::Scalar
}

/// Builds a typed handle from a payload and a semantic kind.
pub trait EntityMaterializer {
    fn materialize(
        &self,
        client: &GraphClient,
        kind: EntityKind,
        payload: &Payload<'_>,
    ) -> Result<Entity>;
}

/// Materializer for the store's standard representations.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultMaterializer;

impl EntityMaterializer for DefaultMaterializer {
    fn materialize(
        &self,
        client: &GraphClient,
        kind: EntityKind,
        payload: &Payload<'_>,
    ) -> Result<Entity> {
        match kind {
            EntityKind::Node => match payload.body.filter(|b| b.get("self").is_some()) {
                Some(repr) => Ok(Node::from_representation(client, repr)?.into()),
                None => Ok(Node::detached(client, identity_or_err(payload, kind)?).into()),
            },
            EntityKind::Relationship => match payload.body.filter(|b| b.get("self").is_some()) {
                Some(repr) => Ok(Relationship::from_representation(client, repr)?.into()),
                None => Ok(Relationship::detached(client, identity_or_err(payload, kind)?).into()),
            },
            EntityKind::IndexNode | EntityKind::IndexRelationship => {
                let url = index_url(payload)
                    .ok_or_else(|| GraphError::MalformedResponse(format!("no {kind} identity")))?;
                let name = url.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
                Ok(Index::new(kind, name, url.as_str()).into())
            }
            EntityKind::Iterable => {
                let items = match payload.body {
                    Some(Value::Array(items)) => items.as_slice(),
                    None | Some(Value::Null) => &[][..],
                    Some(other) => {
                        return Err(GraphError::MalformedResponse(format!(
                            "expected a list, got {other}"
                        )))
                    }
                };
                let entities = items
                    .iter()
                    .map(|item| {
                        let payload = Payload::from_body(Some(item));
                        self.materialize(client, classify(&payload), &payload)
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Entity::Iterable(entities))
            }
            EntityKind::Scalar => Ok(Entity::Scalar(payload.body.cloned().unwrap_or(Value::Null))),
        }
    }
}

fn identity_or_err(payload: &Payload<'_>, kind: EntityKind) -> Result<String> {
    payload
        .identity()
        .map(str::to_string)
        .ok_or_else(|| GraphError::MalformedResponse(format!("no {kind} identity in result")))
}

/// Index URL from a location, or from a `{template}` body.
fn index_url(payload: &Payload<'_>) -> Option<String> {
    if let Some(template) = payload
        .body
        .and_then(|b| b.get("template"))
        .and_then(Value::as_str)
    {
        let url = template.split("/{key}").next().unwrap_or(template);
        return Some(url.to_string());
    }
    payload.location.map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BASE: &str = "http://localhost:7474/db/data";

    #[test]
    fn classify_by_identity() {
        let node = json!({"self": format!("{BASE}/node/1"), "data": {}});
        assert_eq!(classify(&Payload::from_body(Some(&node))), EntityKind::Node);

        let rel = json!({"self": format!("{BASE}/relationship/4"), "data": {}});
        assert_eq!(classify(&Payload::from_body(Some(&rel))), EntityKind::Relationship);
    }

    #[test]
    fn classify_lists_indexes_and_scalars() {
        let list = json!([]);
        assert_eq!(classify(&Payload::from_body(Some(&list))), EntityKind::Iterable);

        let template = json!({"template": format!("{BASE}/index/node/people/{{key}}/{{value}}")});
        let payload = Payload {
            body: Some(&template),
            location: None,
            from: Some("/index/node"),
        };
        assert_eq!(classify(&payload), EntityKind::IndexNode);

        let payload = Payload {
            body: None,
            location: Some("http://localhost:7474/db/data/index/relationship/knows"),
            from: Some("/index/relationship"),
        };
        assert_eq!(classify(&payload), EntityKind::IndexRelationship);

        let scalar = json!("alice");
        assert_eq!(classify(&Payload::from_body(Some(&scalar))), EntityKind::Scalar);
        assert_eq!(classify(&Payload::default()), EntityKind::Scalar);
    }

    #[test]
    fn node_added_to_index_is_still_a_node() {
        let node = json!({"self": format!("{BASE}/node/9"), "data": {}});
        let payload = Payload {
            body: Some(&node),
            location: None,
            from: Some("/index/node/people"),
        };
        assert_eq!(classify(&payload), EntityKind::Node);
    }

    #[test]
    fn index_url_strips_template() {
        let body = json!({"template": format!("{BASE}/index/node/people/{{key}}/{{value}}")});
        let url = index_url(&Payload::from_body(Some(&body))).unwrap();
        assert_eq!(url, format!("{BASE}/index/node/people"));
    }
}
