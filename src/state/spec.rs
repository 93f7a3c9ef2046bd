//! Project specification gathered during research.
//!
//! The same type serves as the in-progress draft and the finalized spec. A
//! draft becomes a spec once [`ProjectSpec::missing_items`] is empty and the
//! user confirms the summary.

use crate::errors::OrchestratorError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    /// Column type, e.g. `string`, `integer`, `datetime`. Empty means untyped.
    #[serde(rename = "type", default)]
    pub field_type: String,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySpec {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Cardinality::OneToOne => "one-to-one",
            Cardinality::OneToMany => "one-to-many",
            Cardinality::ManyToOne => "many-to-one",
            Cardinality::ManyToMany => "many-to-many",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub entity_a: String,
    pub entity_b: String,
    #[serde(rename = "type")]
    pub cardinality: Cardinality,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointStyle {
    #[default]
    CrudDefault,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProjectSpec {
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub entities: Vec<EntitySpec>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    /// `None` until the user confirms a database.
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub endpoints: EndpointStyle,
    #[serde(default)]
    pub auth_required: bool,
    #[serde(default)]
    pub extra_requirements: Vec<String>,
}

/// Details a research step wants folded into the draft. Fields the update
/// leaves out keep their draft value.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct SpecUpdate {
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub entities: Vec<EntitySpec>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub endpoints: Option<EndpointStyle>,
    #[serde(default)]
    pub auth_required: Option<bool>,
    #[serde(default)]
    pub extra_requirements: Vec<String>,
}

impl From<ProjectSpec> for SpecUpdate {
    fn from(spec: ProjectSpec) -> Self {
        let non_empty = |s: String| (!s.trim().is_empty()).then_some(s);
        Self {
            project_name: non_empty(spec.project_name),
            description: non_empty(spec.description),
            entities: spec.entities,
            relationships: spec.relationships,
            database: spec.database,
            endpoints: Some(spec.endpoints),
            auth_required: Some(spec.auth_required),
            extra_requirements: spec.extra_requirements,
        }
    }
}

/// An item the completeness checklist still needs from the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissingItem {
    Entities,
    FieldType { entity: String, field: String },
    Relationships,
    Database,
}

impl MissingItem {
    /// Follow-up question to put to the user.
    pub fn question(&self) -> String {
        match self {
            MissingItem::Entities => {
                "What data should the API manage? Name the main entities and their fields."
                    .to_string()
            }
            MissingItem::FieldType { entity, field } => {
                format!("What type should the field '{field}' on {entity} have?")
            }
            MissingItem::Relationships => {
                "How are your entities related to each other (one-to-many, many-to-many, ...)?"
                    .to_string()
            }
            MissingItem::Database => "Which database should the service use?".to_string(),
        }
    }

    /// Suggested answers shown alongside the question.
    pub fn options(&self) -> Vec<String> {
        match self {
            MissingItem::Database => vec!["PostgreSQL".to_string(), "SQLite".to_string()],
            MissingItem::FieldType { .. } => ["string", "integer", "float", "boolean", "datetime"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for MissingItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingItem::Entities => write!(f, "at least one entity"),
            MissingItem::FieldType { entity, field } => write!(f, "type of {entity}.{field}"),
            MissingItem::Relationships => write!(f, "relationships between entities"),
            MissingItem::Database => write!(f, "database choice"),
        }
    }
}

impl ProjectSpec {
    /// Run the completeness checklist, in the order questions should be asked.
    pub fn missing_items(&self) -> Vec<MissingItem> {
        let mut missing = Vec::new();
        if self.entities.is_empty() {
            missing.push(MissingItem::Entities);
        }
        for entity in &self.entities {
            for field in &entity.fields {
                if field.field_type.trim().is_empty() {
                    missing.push(MissingItem::FieldType {
                        entity: entity.name.clone(),
                        field: field.name.clone(),
                    });
                }
            }
        }
        if self.entities.len() > 1 && self.relationships.is_empty() {
            missing.push(MissingItem::Relationships);
        }
        if self.database.as_deref().is_none_or(|d| d.trim().is_empty()) {
            missing.push(MissingItem::Database);
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing_items().is_empty()
    }

    /// Check the draft and hand back a finalized copy.
    pub fn finalize(&self) -> Result<ProjectSpec, OrchestratorError> {
        let missing = self.missing_items();
        if !missing.is_empty() {
            return Err(OrchestratorError::SpecIncomplete {
                missing: missing.iter().map(|m| m.to_string()).collect(),
            });
        }
        Ok(self.clone())
    }

    /// Fold a researcher update into this draft.
    ///
    /// Entities are matched by name (case-insensitive) and replaced, new
    /// relationships and requirements are appended without duplicates, and
    /// scalar fields only overwrite when the update actually carries a value.
    pub fn merge(&mut self, update: SpecUpdate) {
        if let Some(name) = update.project_name.filter(|n| !n.trim().is_empty()) {
            self.project_name = name;
        }
        if let Some(description) = update.description.filter(|d| !d.trim().is_empty()) {
            self.description = description;
        }
        for entity in update.entities {
            match self
                .entities
                .iter_mut()
                .find(|e| e.name.eq_ignore_ascii_case(&entity.name))
            {
                Some(existing) => *existing = entity,
                None => self.entities.push(entity),
            }
        }
        for rel in update.relationships {
            if !self.relationships.contains(&rel) {
                self.relationships.push(rel);
            }
        }
        if update.database.is_some() {
            self.database = update.database;
        }
        if let Some(endpoints) = update.endpoints {
            self.endpoints = endpoints;
        }
        if let Some(auth) = update.auth_required {
            self.auth_required = auth;
        }
        for req in update.extra_requirements {
            if !self.extra_requirements.contains(&req) {
                self.extra_requirements.push(req);
            }
        }
    }

    /// Human-readable summary presented for confirmation.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        if !self.project_name.is_empty() {
            out.push_str(&format!("Project: {}\n", self.project_name));
        }
        if !self.description.is_empty() {
            out.push_str(&format!("{}\n", self.description));
        }
        out.push_str("Entities:\n");
        for entity in &self.entities {
            let fields: Vec<String> = entity
                .fields
                .iter()
                .map(|f| {
                    let mut s = format!("{}: {}", f.name, f.field_type);
                    if f.unique {
                        s.push_str(" unique");
                    }
                    if f.nullable {
                        s.push_str(" nullable");
                    }
                    s
                })
                .collect();
            out.push_str(&format!("  - {} ({})\n", entity.name, fields.join(", ")));
        }
        if !self.relationships.is_empty() {
            out.push_str("Relationships:\n");
            for rel in &self.relationships {
                out.push_str(&format!(
                    "  - {} {} {}\n",
                    rel.entity_a, rel.cardinality, rel.entity_b
                ));
            }
        }
        out.push_str(&format!(
            "Database: {}\n",
            self.database.as_deref().unwrap_or("(not chosen)")
        ));
        out.push_str(&format!(
            "Auth: {}\n",
            if self.auth_required { "required" } else { "none" }
        ));
        for req in &self.extra_requirements {
            out.push_str(&format!("Also: {req}\n"));
        }
        out
    }

    /// One-line summary used in classifier prompts.
    pub fn short_summary(&self) -> String {
        let names: Vec<&str> = self.entities.iter().map(|e| e.name.as_str()).collect();
        format!(
            "{} entities [{}], database {}, auth {}",
            names.len(),
            names.join(", "),
            self.database.as_deref().unwrap_or("unset"),
            self.auth_required
        )
    }
}
