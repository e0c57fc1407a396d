
use itertools::Itertools;
use std::fmt;

use super::ChunkMetadata;

/// Metadata columns a predicate can constrain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataField {
    OwnerUserId,
    DocumentId,
    ChunkIndex,
}

impl MetadataField {
    /// Column name in the embeddings table
    #[inline]
    pub fn column(self) -> &'static str {
        match self {
            MetadataField::OwnerUserId => "owner_user_id",
            MetadataField::DocumentId => "document_id",
            MetadataField::ChunkIndex => "chunk_index",
        }
    }

    fn value_of(self, metadata: &ChunkMetadata) -> i64 {
        match self {
            MetadataField::OwnerUserId => metadata.owner_user_id,
            MetadataField::DocumentId => metadata.document_id,
            MetadataField::ChunkIndex => i64::from(metadata.chunk_index),
        }
    }
}

/// Filter over chunk metadata, shared by search, delete and count
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Eq { field: MetadataField, value: i64 },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    #[inline]
    pub fn eq(field: MetadataField, value: i64) -> Self {
        Predicate::Eq { field, value }
    }

    /// Conjunction; a single operand is returned unwrapped
    #[inline]
    pub fn and(mut operands: Vec<Predicate>) -> Self {
        if operands.len() == 1 {
            if let Some(only) = operands.pop() {
                return only;
            }
        }
        Predicate::And(operands)
    }

    /// Disjunction; a single operand is returned unwrapped
    #[inline]
    pub fn or(mut operands: Vec<Predicate>) -> Self {
        if operands.len() == 1 {
            if let Some(only) = operands.pop() {
                return only;
            }
        }
        Predicate::Or(operands)
    }

    /// Render as a LanceDB filter expression. Values are integers so no quoting is needed.
    #[inline]
    pub fn to_sql(&self) -> String {
        match self {
            Predicate::Eq { field, value } => format!("{} = {}", field.column(), value),
            Predicate::And(operands) if operands.is_empty() => "true".to_string(),
            Predicate::Or(operands) if operands.is_empty() => "false".to_string(),
            Predicate::And(operands) => operands.iter().map(Self::operand_sql).join(" AND "),
            Predicate::Or(operands) => operands.iter().map(Self::operand_sql).join(" OR "),
        }
    }

    fn operand_sql(operand: &Predicate) -> String {
        match operand {
            Predicate::Eq { .. } => operand.to_sql(),
            _ => format!("({})", operand.to_sql()),
        }
    }

    #[inline]
    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        match self {
            Predicate::Eq { field, value } => field.value_of(metadata) == *value,
            Predicate::And(operands) => operands.iter().all(|p| p.matches(metadata)),
            Predicate::Or(operands) => operands.iter().any(|p| p.matches(metadata)),
        }
    }

    /// The owner this predicate is pinned to, if every match must belong to one owner
    #[inline]
    pub fn required_owner(&self) -> Option<i64> {
        match self {
            Predicate::Eq {
                field: MetadataField::OwnerUserId,
                value,
            } => Some(*value),
            Predicate::And(operands) => operands.iter().find_map(Self::required_owner),
            _ => None,
        }
    }
}

impl fmt::Display for Predicate {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql())
    }
}

/// Builds the owner/document predicate used for retrieval and deletion.
///
/// The owner constraint is always present; documents narrow it further.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeFilter {
    owner_user_id: i64,
    document_ids: Vec<i64>,
}

impl ScopeFilter {
    #[inline]
    pub fn owner(owner_user_id: i64) -> Self {
        Self {
            owner_user_id,
            document_ids: Vec::new(),
        }
    }

    /// Restrict to `document_ids`; an empty slice leaves the scope user-wide
    #[inline]
    pub fn with_documents(mut self, document_ids: &[i64]) -> Self {
        self.document_ids = document_ids.iter().copied().sorted_unstable().dedup().collect();
        self
    }

    #[inline]
    pub fn document(owner_user_id: i64, document_id: i64) -> Self {
        Self::owner(owner_user_id).with_documents(&[document_id])
    }

    #[inline]
    pub fn owner_user_id(&self) -> i64 {
        self.owner_user_id
    }

    #[inline]
    pub fn document_ids(&self) -> &[i64] {
        &self.document_ids
    }

    #[inline]
    pub fn to_predicate(&self) -> Predicate {
        let owner = Predicate::eq(MetadataField::OwnerUserId, self.owner_user_id);

        if self.document_ids.is_empty() {
            return owner;
        }

        let documents = Predicate::or(
            self.document_ids
                .iter()
                .map(|&id| Predicate::eq(MetadataField::DocumentId, id))
                .collect(),
        );

        Predicate::And(vec![owner, documents])
    }
}

impl From<&ScopeFilter> for Predicate {
    #[inline]
    fn from(scope: &ScopeFilter) -> Self {
        scope.to_predicate()
    }
}
