use std::fmt::Write as _;

/// Dimension of the `users.embedding` column.
pub const EMBEDDING_DIM: usize = 1536;

/// A user embedding: exactly [`EMBEDDING_DIM`] finite components.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    /// Renders the pgvector text form, e.g. `[0.1,0.2]`, for binding as `$n::vector`.
    pub fn to_pg_literal(&self) -> String {
        let mut out = String::with_capacity(self.0.len() * 10 + 2);
        out.push('[');
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            let _ = write!(out, "{v}");
        }
        out.push(']');
        out
    }
}

impl TryFrom<Vec<f32>> for Embedding {
    type Error = String;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        if values.len() != EMBEDDING_DIM {
            return Err(format!(
                "embedding must have {EMBEDDING_DIM} dimensions, got {}",
                values.len()
            ));
        }
        if let Some(i) = values.iter().position(|v| !v.is_finite()) {
            return Err(format!("embedding component {i} is not a finite number"));
        }
        Ok(Self(values))
    }
}
