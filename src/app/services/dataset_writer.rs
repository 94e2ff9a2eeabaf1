//! Hierarchical dataset output.
//!
//! This module is the only boundary to the NetCDF collaborator. Converters
//! assemble a [`DatasetSnapshot`] — groups, dimensions, typed variables,
//! attributes — and hand it over in one call; the quality-control passes use
//! [`rewrite_with`] to clone an existing dataset while substituting the
//! variables of one group. Handles are scoped: every open file is closed on
//! all exit paths, including error paths.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde_json::Value;
use tracing::{debug, info};

use crate::app::models::{FrameVariable, MetaEntry, MetaRecordSet, MetaValue};
use crate::config::OutputOptions;
use crate::constants::TARGET_TIMEZONE_HOURS;
use crate::error::{MooringError, Result};

/// Attribute value preserved across dataset copies.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Number(f64),
    Integer(i64),
    Text(String),
    Numbers(Vec<f64>),
    Integers(Vec<i64>),
}

impl AttrValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(f) => Some(*f),
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    fn from_netcdf(value: netcdf::AttributeValue) -> Option<Self> {
        use netcdf::AttributeValue as Av;
        Some(match value {
            Av::Uchar(v) => Self::Integer(v as i64),
            Av::Schar(v) => Self::Integer(v as i64),
            Av::Ushort(v) => Self::Integer(v as i64),
            Av::Short(v) => Self::Integer(v as i64),
            Av::Uint(v) => Self::Integer(v as i64),
            Av::Int(v) => Self::Integer(v as i64),
            Av::Ulonglong(v) => Self::Integer(v as i64),
            Av::Longlong(v) => Self::Integer(v),
            Av::Float(v) => Self::Number(v as f64),
            Av::Double(v) => Self::Number(v),
            Av::Str(v) => Self::Text(v),
            Av::Doubles(v) => Self::Numbers(v),
            Av::Floats(v) => Self::Numbers(v.into_iter().map(f64::from).collect()),
            Av::Ints(v) => Self::Integers(v.into_iter().map(i64::from).collect()),
            Av::Longlongs(v) => Self::Integers(v),
            _ => return None,
        })
    }
}

impl From<&MetaValue> for AttrValue {
    fn from(value: &MetaValue) -> Self {
        match value {
            MetaValue::Number(f) => Self::Number(*f),
            MetaValue::Integer(i) => Self::Integer(*i),
            MetaValue::Text(t) => Self::Text(t.clone()),
            MetaValue::Numbers(v) => Self::Integers(v.clone()),
        }
    }
}

/// One variable of a snapshot: flat row-major values plus shape and the
/// dimension names the values span.
#[derive(Debug, Clone)]
pub struct SnapshotVariable {
    pub name: String,
    pub dims: Vec<String>,
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
    pub attrs: Vec<(String, AttrValue)>,
    /// Written as 32-bit floats when set (coordinate axes, beam velocities).
    pub single_precision: bool,
}

impl SnapshotVariable {
    pub fn series(
        name: impl Into<String>,
        dim: &str,
        data: Vec<f64>,
        attrs: Vec<(String, AttrValue)>,
    ) -> Self {
        Self {
            name: name.into(),
            dims: vec![dim.to_owned()],
            shape: vec![data.len()],
            data,
            attrs,
            single_precision: false,
        }
    }

    pub fn profile(
        name: impl Into<String>,
        dims: [&str; 2],
        shape: [usize; 2],
        data: Vec<f64>,
        attrs: Vec<(String, AttrValue)>,
    ) -> Self {
        Self {
            name: name.into(),
            dims: dims.iter().map(|d| (*d).to_owned()).collect(),
            shape: shape.to_vec(),
            data,
            attrs,
            single_precision: false,
        }
    }

    pub fn single(mut self) -> Self {
        self.single_precision = true;
        self
    }

    /// Length along the leading (time) axis.
    pub fn time_len(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }
}

/// One group of a snapshot; nested groups are preserved recursively.
#[derive(Debug, Clone, Default)]
pub struct SnapshotGroup {
    pub name: String,
    pub dims: Vec<(String, usize)>,
    pub attrs: Vec<(String, AttrValue)>,
    pub vars: Vec<SnapshotVariable>,
    pub groups: Vec<SnapshotGroup>,
}

impl SnapshotGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn variable(&self, name: &str) -> Option<&SnapshotVariable> {
        self.vars.iter().find(|v| v.name == name)
    }

    pub fn attr_number(&self, name: &str) -> Option<f64> {
        self.attrs
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_number())
    }

    /// Build a metadata group from an ordered record set.
    ///
    /// Dimensioned records share axes by element count: the dimension table
    /// is keyed by size, and a new `indN` axis is allocated only when no
    /// existing axis has the record's size.
    pub fn from_records(name: impl Into<String>, set: &MetaRecordSet) -> Self {
        let mut group = Self::new(name);
        let mut dims_by_size: HashMap<usize, String> = HashMap::new();
        let mut next_axis = 0usize;

        for (entry_name, entry) in &set.entries {
            match entry {
                MetaEntry::Attribute(value) => {
                    group.attrs.push((entry_name.clone(), AttrValue::from(value)));
                }
                MetaEntry::Record { value, attrs } => {
                    let size = value.size();
                    let dim = dims_by_size
                        .entry(size)
                        .or_insert_with(|| {
                            next_axis += 1;
                            let dim_name = format!("ind{next_axis}");
                            group.dims.push((dim_name.clone(), size));
                            dim_name
                        })
                        .clone();

                    let mut var_attrs: Vec<(String, AttrValue)> = attrs
                        .iter()
                        .map(|(k, v)| (k.clone(), AttrValue::Text(v.clone())))
                        .collect();
                    let data = match value {
                        MetaValue::Number(f) => vec![*f],
                        MetaValue::Integer(i) => vec![*i as f64],
                        MetaValue::Numbers(v) => v.iter().map(|&i| i as f64).collect(),
                        MetaValue::Text(text) => {
                            // Text records carry their content as a `value`
                            // attribute on a placeholder variable, keeping the
                            // descriptive attributes attached.
                            var_attrs.push(("value".to_owned(), AttrValue::Text(text.clone())));
                            vec![f64::NAN]
                        }
                    };
                    group.vars.push(SnapshotVariable {
                        name: entry_name.clone(),
                        dims: vec![dim],
                        shape: vec![size],
                        data,
                        attrs: var_attrs,
                        single_precision: false,
                    });
                }
            }
        }
        group
    }

    /// Build a metadata tree from a nested key-value document.
    ///
    /// Scalars become attributes, mappings become nested groups, and lists
    /// of mappings become `"<name> Meta Group"` subgroups. A declared
    /// `offsetfromutc` is rewritten to the target timezone, since the time
    /// axis has already been shifted; `index` entries are bookkeeping and
    /// are skipped.
    pub fn from_json(name: impl Into<String>, tree: &Value) -> Self {
        let mut group = Self::new(name);
        if let Some(map) = tree.as_object() {
            for (key, value) in map {
                match value {
                    Value::Object(_) => group.groups.push(Self::from_json(key.clone(), value)),
                    Value::Array(items) => {
                        for item in items {
                            let sub_name = item
                                .get("name")
                                .and_then(Value::as_str)
                                .map(|n| format!("{n} Meta Group"))
                                .unwrap_or_else(|| key.clone());
                            group.groups.push(Self::from_json(sub_name, item));
                        }
                    }
                    _ => {
                        if key == "index" {
                            continue;
                        }
                        if let Some(attr) = json_attr(key, value) {
                            group.attrs.push(attr);
                        }
                    }
                }
            }
        }
        group
    }
}

fn json_attr(key: &str, value: &Value) -> Option<(String, AttrValue)> {
    if key == "offsetfromutc" {
        return Some((key.to_owned(), AttrValue::Number(TARGET_TIMEZONE_HOURS)));
    }
    let attr = match value {
        Value::String(s) => AttrValue::Text(s.clone()),
        Value::Bool(b) => AttrValue::Integer(*b as i64),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                AttrValue::Integer(i)
            } else {
                AttrValue::Number(n.as_f64()?)
            }
        }
        _ => return None,
    };
    Some((key.to_owned(), attr))
}

/// In-memory image of a hierarchical dataset.
#[derive(Debug, Clone, Default)]
pub struct DatasetSnapshot {
    pub attrs: Vec<(String, AttrValue)>,
    pub dims: Vec<(String, usize)>,
    pub vars: Vec<SnapshotVariable>,
    pub groups: Vec<SnapshotGroup>,
}

impl DatasetSnapshot {
    pub fn group(&self, name: &str) -> Option<&SnapshotGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn group_mut(&mut self, name: &str) -> Option<&mut SnapshotGroup> {
        self.groups.iter_mut().find(|g| g.name == name)
    }

    pub fn variable(&self, name: &str) -> Option<&SnapshotVariable> {
        self.vars.iter().find(|v| v.name == name)
    }

    pub fn attr_number(&self, name: &str) -> Option<f64> {
        self.attrs
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_number())
    }
}

// =============================================================================
// Reading
// =============================================================================

/// Read a complete dataset into memory.
pub fn read_snapshot(path: &Path) -> Result<DatasetSnapshot> {
    let file = netcdf::open(path)?;
    let mut snapshot = DatasetSnapshot::default();

    for attr in file.attributes() {
        if let Some(value) = AttrValue::from_netcdf(attr.value()?) {
            snapshot.attrs.push((attr.name().to_owned(), value));
        }
    }
    for dim in file.dimensions() {
        snapshot.dims.push((dim.name().to_owned(), dim.len()));
    }
    for var in file.variables() {
        snapshot.vars.push(read_variable(&var)?);
    }
    for group in file.groups()? {
        snapshot.groups.push(read_group(&group)?);
    }
    debug!(path = %path.display(), groups = snapshot.groups.len(), "dataset snapshot read");
    Ok(snapshot)
}

fn read_group(group: &netcdf::Group) -> Result<SnapshotGroup> {
    let mut out = SnapshotGroup::new(group.name());
    for attr in group.attributes() {
        if let Some(value) = AttrValue::from_netcdf(attr.value()?) {
            out.attrs.push((attr.name().to_owned(), value));
        }
    }
    for dim in group.dimensions() {
        out.dims.push((dim.name().to_owned(), dim.len()));
    }
    for var in group.variables() {
        out.vars.push(read_variable(&var)?);
    }
    for nested in group.groups() {
        out.groups.push(read_group(&nested)?);
    }
    Ok(out)
}

fn read_variable(var: &netcdf::Variable) -> Result<SnapshotVariable> {
    let dims: Vec<String> = var.dimensions().iter().map(|d| d.name()).collect();
    let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
    let data: Vec<f64> = var.get_values(..)?;
    let mut attrs = Vec::new();
    for attr in var.attributes() {
        if let Some(value) = AttrValue::from_netcdf(attr.value()?) {
            attrs.push((attr.name().to_owned(), value));
        }
    }
    let single_precision = matches!(
        var.vartype(),
        netcdf::types::NcVariableType::Float(netcdf::types::FloatType::F32)
    );
    Ok(SnapshotVariable {
        name: var.name().to_owned(),
        dims,
        shape,
        data,
        attrs,
        single_precision,
    })
}

// =============================================================================
// Writing
// =============================================================================

/// Write a snapshot to a new dataset file.
pub fn write_snapshot(path: &Path, snapshot: &DatasetSnapshot, opts: &OutputOptions) -> Result<()> {
    let mut file = netcdf::create(path)?;
    {
        let mut root = file.root_mut().ok_or_else(|| {
            MooringError::data_integrity("output format does not support hierarchical groups")
        })?;
        for (name, value) in &snapshot.attrs {
            put_group_attr(&mut root, name, value)?;
        }
        for (name, len) in &snapshot.dims {
            root.add_dimension(name, *len)?;
        }
        for var in &snapshot.vars {
            write_variable(&mut root, var, opts)?;
        }
        for group in &snapshot.groups {
            write_group(&mut root, group, opts)?;
        }
    }
    info!(path = %path.display(), "dataset written");
    Ok(())
}

fn write_group(
    parent: &mut netcdf::GroupMut,
    group: &SnapshotGroup,
    opts: &OutputOptions,
) -> Result<()> {
    let mut target = parent.add_group(&group.name)?;
    for (name, value) in &group.attrs {
        put_group_attr(&mut target, name, value)?;
    }
    for (name, len) in &group.dims {
        target.add_dimension(name, *len)?;
    }
    for var in &group.vars {
        write_variable(&mut target, var, opts)?;
    }
    for nested in &group.groups {
        write_group(&mut target, nested, opts)?;
    }
    Ok(())
}

fn put_group_attr(group: &mut netcdf::GroupMut, name: &str, value: &AttrValue) -> Result<()> {
    match value {
        AttrValue::Number(v) => group.add_attribute(name, *v)?,
        AttrValue::Integer(v) => group.add_attribute(name, *v)?,
        AttrValue::Text(v) => group.add_attribute(name, v.as_str())?,
        AttrValue::Numbers(v) => group.add_attribute(name, v.clone())?,
        AttrValue::Integers(v) => group.add_attribute(name, v.clone())?,
    };
    Ok(())
}

fn write_variable(
    group: &mut netcdf::GroupMut,
    var: &SnapshotVariable,
    opts: &OutputOptions,
) -> Result<()> {
    let dim_refs: Vec<&str> = var.dims.iter().map(String::as_str).collect();
    if var.single_precision {
        let mut nc_var = group.add_variable::<f32>(&var.name, &dim_refs)?;
        if opts.zlib {
            nc_var.set_compression(opts.complevel as i32, false)?;
        }
        let values: Vec<f32> = var.data.iter().map(|&v| v as f32).collect();
        nc_var.put_values(&values, ..)?;
        for (name, value) in &var.attrs {
            put_var_attr(&mut nc_var, name, value)?;
        }
    } else {
        let mut nc_var = group.add_variable::<f64>(&var.name, &dim_refs)?;
        if opts.zlib {
            nc_var.set_compression(opts.complevel as i32, false)?;
        }
        nc_var.put_values(&var.data, ..)?;
        for (name, value) in &var.attrs {
            put_var_attr(&mut nc_var, name, value)?;
        }
    }
    Ok(())
}

fn put_var_attr(var: &mut netcdf::VariableMut, name: &str, value: &AttrValue) -> Result<()> {
    match value {
        AttrValue::Number(v) => var.put_attribute(name, *v)?,
        AttrValue::Integer(v) => var.put_attribute(name, *v)?,
        AttrValue::Text(v) => var.put_attribute(name, v.as_str())?,
        AttrValue::Numbers(v) => var.put_attribute(name, v.clone())?,
        AttrValue::Integers(v) => var.put_attribute(name, v.clone())?,
    };
    Ok(())
}

// =============================================================================
// Copy with replacement
// =============================================================================

/// Clone `src` to `dst`, substituting the named group's variables.
///
/// Dimensions of the target group whose name matches a replaced variable
/// are resized to the replacement's leading-axis length, so trimming passes
/// shrink the group's time axis consistently. Variables absent from
/// `replacements` are copied unchanged, as is everything outside the target
/// group.
pub fn rewrite_with(
    src: &Path,
    dst: &Path,
    target_group: &str,
    replacements: &BTreeMap<String, FrameVariable>,
    opts: &OutputOptions,
) -> Result<()> {
    let mut snapshot = read_snapshot(src)?;
    {
        let group = snapshot.group_mut(target_group).ok_or_else(|| {
            MooringError::data_integrity(format!("dataset has no '{target_group}' group"))
        })?;
        for (name, len) in group.dims.iter_mut() {
            if let Some(replacement) = replacements.get(name) {
                *len = replacement.time_len();
            }
        }
        for var in group.vars.iter_mut() {
            if let Some(replacement) = replacements.get(&var.name) {
                match replacement {
                    FrameVariable::Series(values) => {
                        var.shape = vec![values.len()];
                        var.data = values.to_vec();
                    }
                    FrameVariable::Profile(values) => {
                        var.shape = vec![values.nrows(), values.ncols()];
                        var.data = values.iter().copied().collect();
                    }
                }
            }
        }
    }
    write_snapshot(dst, &snapshot, opts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_sets_share_dimensions_by_size() {
        let mut set = MetaRecordSet::new();
        set.push_record("WS", MetaValue::Integer(100), vec![]);
        set.push_record("WN", MetaValue::Integer(30), vec![]);
        set.push_record(
            "TE",
            MetaValue::Numbers(vec![0, 0, 30, 0]),
            vec![("long_name".to_owned(), "time per ensemble".to_owned())],
        );
        set.push_record("TP", MetaValue::Numbers(vec![0, 1, 0]), vec![]);
        set.push_attribute("Beam Pattern", MetaValue::Text("CONVEX".to_owned()));

        let group = SnapshotGroup::from_records("Deployment Information", &set);
        // Scalars share ind1; the two lists differ in length -> ind2, ind3.
        assert_eq!(
            group.dims,
            vec![
                ("ind1".to_owned(), 1),
                ("ind2".to_owned(), 4),
                ("ind3".to_owned(), 3)
            ]
        );
        assert_eq!(group.vars.len(), 4);
        assert_eq!(group.vars[0].dims, vec!["ind1".to_owned()]);
        assert_eq!(group.vars[1].dims, vec!["ind1".to_owned()]);
        assert_eq!(group.attrs.len(), 1);
    }

    #[test]
    fn json_tree_rewrites_utc_offset_and_skips_index() {
        let tree = json!({
            "instrument": {"model": "TDR-2050", "offsetfromutc": 0.0},
            "dataheader": [
                {"name": "Depth", "units": "m", "index": 3},
                {"name": "Temperature", "units": "degC", "index": 4}
            ]
        });
        let group = SnapshotGroup::from_json("Meta Group", &tree);
        let instrument = &group.groups[0];
        assert_eq!(instrument.name, "instrument");
        assert_eq!(instrument.attr_number("offsetfromutc"), Some(8.0));

        let depth = group
            .groups
            .iter()
            .find(|g| g.name == "Depth Meta Group")
            .unwrap();
        assert!(depth.attrs.iter().any(|(k, _)| k == "units"));
        assert!(!depth.attrs.iter().any(|(k, _)| k == "index"));
    }

    #[test]
    fn text_records_become_placeholder_variables() {
        let mut set = MetaRecordSet::new();
        set.push_record(
            "CPU Serial Number",
            MetaValue::Text("29 00 00 01".to_owned()),
            vec![],
        );
        let group = SnapshotGroup::from_records("File Details", &set);
        let var = group.variable("CPU Serial Number").unwrap();
        assert!(var.data[0].is_nan());
        assert!(
            var.attrs
                .iter()
                .any(|(k, v)| k == "value" && *v == AttrValue::Text("29 00 00 01".to_owned()))
        );
    }
}
