//! Structured metadata records for the output dataset.
//!
//! Profiler deployment commands and detail-file fields used to travel as ad
//! hoc nested dictionaries; here they are explicit records. A record set is
//! written into its own dataset group, with dimensioned entries becoming
//! variables that share axes by size (see the dataset writer).

/// A metadata value as it appears in instrument side files.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    Number(f64),
    Integer(i64),
    Text(String),
    Numbers(Vec<i64>),
}

impl MetaValue {
    /// Element count when written as a dataset variable.
    pub fn size(&self) -> usize {
        match self {
            Self::Numbers(v) => v.len(),
            _ => 1,
        }
    }

    /// Parse an instrument-side scalar: integer, float, or verbatim text.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Ok(i) = trimmed.parse::<i64>() {
            Self::Integer(i)
        } else if let Ok(f) = trimmed.parse::<f64>() {
            Self::Number(f)
        } else {
            Self::Text(trimmed.to_owned())
        }
    }
}

/// One entry of a metadata record set.
#[derive(Debug, Clone)]
pub enum MetaEntry {
    /// Plain group attribute.
    Attribute(MetaValue),
    /// Dimensioned record written as a variable carrying its own
    /// descriptive attributes (long_name, units, ...).
    Record {
        value: MetaValue,
        attrs: Vec<(String, String)>,
    },
}

/// Ordered set of metadata entries destined for one dataset group.
#[derive(Debug, Clone, Default)]
pub struct MetaRecordSet {
    pub entries: Vec<(String, MetaEntry)>,
}

impl MetaRecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_attribute(&mut self, name: impl Into<String>, value: MetaValue) {
        self.entries.push((name.into(), MetaEntry::Attribute(value)));
    }

    pub fn push_record(
        &mut self,
        name: impl Into<String>,
        value: MetaValue,
        attrs: Vec<(String, String)>,
    ) {
        self.entries
            .push((name.into(), MetaEntry::Record { value, attrs }));
    }

    pub fn get(&self, name: &str) -> Option<&MetaEntry> {
        self.entries
            .iter()
            .find(|(entry_name, _)| entry_name == name)
            .map(|(_, entry)| entry)
    }

    /// Numeric value of a record or attribute, if it has one.
    pub fn number(&self, name: &str) -> Option<f64> {
        match self.get(name)? {
            MetaEntry::Attribute(value) | MetaEntry::Record { value, .. } => match value {
                MetaValue::Number(f) => Some(*f),
                MetaValue::Integer(i) => Some(*i as f64),
                _ => None,
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_distinguishes_scalar_kinds() {
        assert_eq!(MetaValue::parse("42"), MetaValue::Integer(42));
        assert_eq!(MetaValue::parse(" -3.5 "), MetaValue::Number(-3.5));
        assert_eq!(
            MetaValue::parse("CONVEX"),
            MetaValue::Text("CONVEX".to_owned())
        );
    }

    #[test]
    fn record_set_number_lookup() {
        let mut set = MetaRecordSet::new();
        set.push_record(
            "Beam angle",
            MetaValue::Integer(20),
            vec![("units".to_owned(), "degrees".to_owned())],
        );
        set.push_attribute("Beam Pattern", MetaValue::Text("CONVEX".to_owned()));
        assert_eq!(set.number("Beam angle"), Some(20.0));
        assert_eq!(set.number("Beam Pattern"), None);
    }
}
