//! Parser for the instrument's ASCII data records.
//!
//! With `:FORM:DATA ASC` and `:FORM:ELEM VOLT,CURR` the instrument answers
//! every data query with comma-separated numbers, e.g.
//! `+1.000000E+00,+2.000000E-06`. Fields are kept as text and converted on
//! access, so a trailing field the caller never asks for cannot fail a read.

use crate::error::{SmuError, SmuResult};

/// One comma-separated response.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    fields: Vec<String>,
}

impl Record {
    /// Tokenize a raw response.
    ///
    /// Fails with [`SmuError::MalformedResponse`] on non-UTF-8 input, an
    /// empty answer or an empty field.
    pub fn parse(raw: &[u8]) -> SmuResult<Self> {
        let text = std::str::from_utf8(raw).map_err(|_| {
            SmuError::MalformedResponse(format!("non-ASCII response {:?}", raw))
        })?;
        let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');
        if text.is_empty() {
            return Err(SmuError::MalformedResponse("empty response".to_string()));
        }

        let fields: Vec<String> = text.split(',').map(|f| f.trim().to_string()).collect();
        if let Some(index) = fields.iter().position(String::is_empty) {
            return Err(SmuError::MalformedResponse(format!(
                "empty field {} in '{}'",
                index, text
            )));
        }

        Ok(Self { fields })
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True if the record holds no fields (never produced by [`Record::parse`]).
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Numeric value of field `index`.
    pub fn value(&self, index: usize) -> SmuResult<f64> {
        let field = self.fields.get(index).ok_or_else(|| {
            SmuError::MalformedResponse(format!(
                "expected at least {} fields, got {} in '{}'",
                index + 1,
                self.fields.len(),
                self.fields.join(",")
            ))
        })?;

        match field.parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(value),
            _ => Err(SmuError::MalformedResponse(format!(
                "field {} is not a finite number: '{}'",
                index, field
            ))),
        }
    }

    /// Every field as a number.
    pub fn values(&self) -> SmuResult<Vec<f64>> {
        (0..self.fields.len()).map(|i| self.value(i)).collect()
    }
}
