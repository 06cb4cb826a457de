//! Parameter binding
//!
//! A [`Binder`] collects IN values and OUT registrations for one statement
//! and compiles them into the per-slot values and bind metadata an execute
//! needs. Compilation is the only way to get a parameter set, so an
//! execution with unset or inconsistent parameters is rejected before
//! anything is sent.
//!
//! Slots are addressed either by 1-based index or by name (`:name`
//! placeholders, or formal parameter names of a call). The two styles cannot
//! be mixed within one execution.

use crate::config::{Config, Dialect};
use crate::constants::{BindDirection, SqlType};
use crate::error::{Error, Result};
use crate::messages::BindMeta;
use crate::row::Value;
use crate::statement::{CallArg, Statement};

/// How a parameter is addressed
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BindSlot {
    /// 1-based position
    Index(usize),
    /// Placeholder or formal parameter name
    Name(String),
}

/// Something that can address a parameter: `usize` indexes, strings name
pub trait BindIndex {
    /// Convert into a slot address
    fn to_slot(self) -> BindSlot;
}

impl BindIndex for usize {
    fn to_slot(self) -> BindSlot {
        BindSlot::Index(self)
    }
}

impl BindIndex for i32 {
    fn to_slot(self) -> BindSlot {
        // negative indexes become 0, which is always out of range
        BindSlot::Index(usize::try_from(self).unwrap_or(0))
    }
}

impl BindIndex for &str {
    fn to_slot(self) -> BindSlot {
        BindSlot::Name(self.to_string())
    }
}

impl BindIndex for String {
    fn to_slot(self) -> BindSlot {
        BindSlot::Name(self)
    }
}

impl BindIndex for BindSlot {
    fn to_slot(self) -> BindSlot {
        self
    }
}

/// A parameter address plus its direction and declared type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindTarget {
    /// Address as given by the caller
    pub slot: BindSlot,
    /// IN, OUT or IN OUT
    pub direction: BindDirection,
    /// Declared type (OUT registrations)
    pub declared_type: SqlType,
}

/// A bound or registered parameter
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParameter {
    /// Where and how it is bound
    pub target: BindTarget,
    /// IN value; `None` for a pure OUT registration
    pub value: Option<Value>,
}

/// Parameters ready to be sent, one entry per slot
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompiledParams {
    /// Value per slot (NULL for pure OUT slots)
    pub values: Vec<Value>,
    /// Direction and type per slot
    pub metas: Vec<BindMeta>,
}

impl CompiledParams {
    /// 0-based slots registered for output
    pub fn out_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.metas
            .iter()
            .enumerate()
            .filter(|(_, m)| m.direction.is_output())
            .map(|(i, _)| i)
    }

    /// Whether any slot is an output
    pub fn has_out(&self) -> bool {
        self.out_slots().next().is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BindStyle {
    Positional,
    Named,
}

/// Parameter binder for one statement
#[derive(Debug, Clone)]
pub struct Binder {
    slots: Vec<Option<BoundParameter>>,
    slot_names: Vec<Option<String>>,
    formal_names: Vec<Option<String>>,
    is_call: bool,
    dialect: Dialect,
    style: Option<BindStyle>,
}

impl Binder {
    /// Create a binder sized for `statement`
    pub fn new(statement: &Statement, config: &Config) -> Self {
        let count = statement.param_count();
        let mut formal_names = vec![None; count];
        if let Some(spec) = statement.call_spec() {
            for arg in &spec.args {
                if let CallArg::Param {
                    slot,
                    formal: Some(name),
                } = arg
                {
                    if let Some(entry) = formal_names.get_mut(*slot) {
                        *entry = Some(name.trim_start_matches(':').to_uppercase());
                    }
                }
            }
        }
        Self {
            slots: vec![None; count],
            slot_names: (0..count)
                .map(|i| statement.slot_name(i).map(str::to_string))
                .collect(),
            formal_names,
            is_call: statement.is_call(),
            dialect: config.mode,
            style: None,
        }
    }

    /// Number of parameter slots
    pub fn param_count(&self) -> usize {
        self.slots.len()
    }

    fn check_style(&mut self, slot: &BindSlot) -> Result<()> {
        let style = match slot {
            BindSlot::Index(_) => BindStyle::Positional,
            BindSlot::Name(_) => BindStyle::Named,
        };
        match self.style {
            Some(current) if current != style => Err(Error::BindMixing),
            _ => {
                self.style = Some(style);
                Ok(())
            }
        }
    }

    /// Resolve an address to a 0-based slot
    pub fn resolve(&self, slot: &BindSlot) -> Result<usize> {
        match slot {
            BindSlot::Index(index) => {
                if *index == 0 || *index > self.slots.len() {
                    Err(Error::ParameterIndexOutOfRange {
                        index: *index,
                        count: self.slots.len(),
                    })
                } else {
                    Ok(index - 1)
                }
            }
            BindSlot::Name(name) => {
                let wanted = name.trim_start_matches(':').to_uppercase();
                self.slot_names
                    .iter()
                    .position(|n| n.as_deref() == Some(wanted.as_str()))
                    .or_else(|| {
                        self.formal_names
                            .iter()
                            .position(|n| n.as_deref() == Some(wanted.as_str()))
                    })
                    .ok_or_else(|| Error::UnknownParameterName(name.clone()))
            }
        }
    }

    /// Bind an IN value. Re-binding a slot replaces its value; a slot
    /// already registered for output becomes IN OUT.
    pub fn bind(&mut self, target: impl BindIndex, value: impl Into<Value>) -> Result<()> {
        let slot = target.to_slot();
        let index = self.resolve(&slot)?;
        self.check_style(&slot)?;
        let mut value = value.into();
        if self.dialect.is_oracle() && matches!(&value, Value::String(s) if s.is_empty()) {
            value = Value::Null;
        }

        let entry = &mut self.slots[index];
        match entry {
            Some(existing) if existing.target.direction.is_output() => {
                existing.target.direction = BindDirection::InputOutput;
                existing.value = Some(value);
            }
            _ => {
                *entry = Some(BoundParameter {
                    target: BindTarget {
                        slot,
                        direction: BindDirection::Input,
                        declared_type: SqlType::Unknown,
                    },
                    value: Some(value),
                });
            }
        }
        Ok(())
    }

    /// Register a slot for output. A slot that already has an IN value
    /// becomes IN OUT.
    pub fn register_out(&mut self, target: impl BindIndex, sql_type: SqlType) -> Result<()> {
        let slot = target.to_slot();
        let index = self.resolve(&slot)?;
        self.check_style(&slot)?;
        let entry = &mut self.slots[index];
        match entry {
            Some(existing) if existing.value.is_some() => {
                existing.target.direction = BindDirection::InputOutput;
                existing.target.declared_type = sql_type;
            }
            _ => {
                *entry = Some(BoundParameter {
                    target: BindTarget {
                        slot,
                        direction: BindDirection::Output,
                        declared_type: sql_type,
                    },
                    value: None,
                });
            }
        }
        Ok(())
    }

    /// Check whether a 0-based slot was registered for output
    pub fn is_out(&self, index: usize) -> bool {
        self.slots
            .get(index)
            .and_then(Option::as_ref)
            .map(|p| p.target.direction.is_output())
            .unwrap_or(false)
    }

    /// Declared OUT type of a 0-based slot
    pub fn out_type(&self, index: usize) -> Option<SqlType> {
        self.slots
            .get(index)
            .and_then(Option::as_ref)
            .filter(|p| p.target.direction.is_output())
            .map(|p| p.target.declared_type)
    }

    /// Bound parameters in slot order
    pub fn parameters(&self) -> &[Option<BoundParameter>] {
        &self.slots
    }

    /// Forget every value and registration
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.style = None;
    }

    /// End of an execution: values stay, the addressing style is free again
    pub fn finish_execution(&mut self) {
        self.style = None;
    }

    /// Validate and produce the parameter set
    pub fn compile(&self) -> Result<CompiledParams> {
        if self.is_call {
            let provided = self.slots.iter().filter(|s| s.is_some()).count();
            if provided != self.slots.len() {
                return Err(Error::ParameterCountMismatch {
                    expected: self.slots.len(),
                    actual: provided,
                });
            }
        }

        let mut compiled = CompiledParams {
            values: Vec::with_capacity(self.slots.len()),
            metas: Vec::with_capacity(self.slots.len()),
        };
        for (i, slot) in self.slots.iter().enumerate() {
            let param = slot.as_ref().ok_or(Error::MissingParameter(i + 1))?;
            compiled
                .values
                .push(param.value.clone().unwrap_or(Value::Null));
            compiled.metas.push(BindMeta {
                direction: param.target.direction,
                sql_type: param.target.declared_type,
            });
        }
        Ok(compiled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binder(sql: &str, config: &Config) -> Binder {
        Binder::new(&Statement::parse(sql, config), config)
    }

    #[test]
    fn test_rebinding_overwrites() {
        let config = Config::default();
        let mut b = binder("SELECT ?, ?", &config);
        b.bind(1usize, 1i64).unwrap();
        b.bind(2usize, "x").unwrap();
        b.bind(1usize, 5i64).unwrap();
        let compiled = b.compile().unwrap();
        assert_eq!(compiled.values, vec![Value::Int(5), Value::String("x".into())]);
    }

    #[test]
    fn test_index_out_of_range() {
        let config = Config::default();
        let mut b = binder("SELECT ?", &config);
        assert!(matches!(
            b.bind(2usize, 1i64),
            Err(Error::ParameterIndexOutOfRange { index: 2, count: 1 })
        ));
        assert!(b.bind(0usize, 1i64).is_err());
    }

    #[test]
    fn test_missing_parameter() {
        let config = Config::default();
        let mut b = binder("SELECT ?, ?", &config);
        b.bind(1usize, 1i64).unwrap();
        let err = b.compile().unwrap_err();
        assert_eq!(err.to_string(), "Missing IN or OUT parameter at index:: 2");
    }

    #[test]
    fn test_named_and_positional_cannot_mix() {
        let config = Config::new(Dialect::Oracle).with_name_binding(true);
        let mut b = binder("SELECT :a, :b FROM dual", &config);
        b.bind(":a", 1i64).unwrap();
        let err = b.bind(2usize, 2i64).unwrap_err();
        assert!(matches!(err, Error::BindMixing));
        assert_eq!(
            err.to_string(),
            "Ordinal binding and Named binding cannot be combined!"
        );
        b.finish_execution();
        b.bind(2usize, 2i64).unwrap();
    }

    #[test]
    fn test_named_lookup_is_case_insensitive() {
        let config = Config::new(Dialect::Oracle).with_name_binding(true);
        let mut b = binder("SELECT :Name FROM dual", &config);
        b.bind("NAME", "v").unwrap();
        assert!(matches!(b.bind("other", 1i64), Err(Error::UnknownParameterName(_))));
    }

    #[test]
    fn test_oracle_empty_string_is_null() {
        let config = Config::new(Dialect::Oracle);
        let mut b = binder("SELECT ? FROM dual", &config);
        b.bind(1usize, "").unwrap();
        assert_eq!(b.compile().unwrap().values, vec![Value::Null]);

        let config = Config::default();
        let mut b = binder("SELECT ?", &config);
        b.bind(1usize, "").unwrap();
        assert_eq!(b.compile().unwrap().values, vec![Value::String(String::new())]);
    }

    #[test]
    fn test_out_then_in_becomes_inout() {
        let config = Config::default();
        let mut b = binder("{call p(?)}", &config);
        b.register_out(1usize, SqlType::Integer).unwrap();
        b.bind(1usize, 10i64).unwrap();
        let compiled = b.compile().unwrap();
        assert_eq!(compiled.metas[0].direction, BindDirection::InputOutput);
        assert_eq!(compiled.out_slots().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn test_call_count_mismatch_names_both_counts() {
        let config = Config::default();
        let mut b = binder("{? = call f('x', 100, ?, ?)}", &config);
        b.register_out(1usize, SqlType::Varchar).unwrap();
        let err = b.compile().unwrap_err();
        assert!(matches!(err, Error::ParameterCountMismatch { expected: 3, actual: 1 }));
        let text = err.to_string();
        assert!(text.contains("number of parameter names does not match"));
        assert!(text.contains('3') && text.contains('1'));
    }

    #[test]
    fn test_formal_name_binding_on_call() {
        let config = Config::new(Dialect::Oracle).with_name_binding(true);
        let mut b = binder("{call p(p_in => ?, p_out => ?)}", &config);
        b.bind("p_in", 5i64).unwrap();
        b.register_out("P_OUT", SqlType::Integer).unwrap();
        let compiled = b.compile().unwrap();
        assert_eq!(compiled.values[0], Value::Int(5));
        assert!(b.is_out(1));
    }
}
