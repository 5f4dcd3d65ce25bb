// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Structure-of-arrays storage for one trait's field values, indexed by
//! entity row.

use crate::entity::EntityId;
use crate::trait_def::{FieldAssign, FieldKind, FieldValue, Record, Trait};

/// One field's dense array, typed by element kind. Tag traits have no
/// columns at all — presence is conveyed purely by the mask, so there is
/// no storage to allocate.
#[derive(Debug, Clone)]
enum ColumnArray {
    Number(Vec<f64>),
    Bool(Vec<bool>),
    Reference(Vec<Option<EntityId>>),
}

impl ColumnArray {
    fn new(kind: FieldKind) -> Self {
        match kind {
            FieldKind::Number => ColumnArray::Number(Vec::new()),
            FieldKind::Bool => ColumnArray::Bool(Vec::new()),
            FieldKind::Reference => ColumnArray::Reference(Vec::new()),
        }
    }

    fn len(&self) -> usize {
        match self {
            ColumnArray::Number(v) => v.len(),
            ColumnArray::Bool(v) => v.len(),
            ColumnArray::Reference(v) => v.len(),
        }
    }

    /// Grow geometrically so repeated single-row growth stays amortized
    /// O(1).
    fn ensure_capacity(&mut self, row: usize, default: FieldValue) {
        if row < self.len() {
            return;
        }
        let new_len = (row + 1).max(self.len() * 2).max(4);
        match (self, default) {
            (ColumnArray::Number(v), FieldValue::Number(d)) => v.resize(new_len, d),
            (ColumnArray::Bool(v), FieldValue::Bool(d)) => v.resize(new_len, d),
            (ColumnArray::Reference(v), FieldValue::Reference(d)) => v.resize(new_len, d),
            _ => unreachable!("column kind must match its trait's field kind"),
        }
    }

    fn get(&self, row: usize) -> FieldValue {
        match self {
            ColumnArray::Number(v) => FieldValue::Number(v[row]),
            ColumnArray::Bool(v) => FieldValue::Bool(v[row]),
            ColumnArray::Reference(v) => FieldValue::Reference(v[row]),
        }
    }

    /// Write `value`, returning `true` if it differs from what was there.
    fn set_with_change_detection(&mut self, row: usize, value: FieldValue) -> bool {
        match (self, value) {
            (ColumnArray::Number(v), FieldValue::Number(n)) => {
                let changed = v[row] != n;
                v[row] = n;
                changed
            }
            (ColumnArray::Bool(v), FieldValue::Bool(b)) => {
                let changed = v[row] != b;
                v[row] = b;
                changed
            }
            (ColumnArray::Reference(v), FieldValue::Reference(r)) => {
                let changed = v[row] != r;
                v[row] = r;
                changed
            }
            _ => unreachable!("column kind must match its trait's field kind"),
        }
    }
}

/// One dense array per field of a trait, indexed by entity row.
#[derive(Debug, Clone)]
pub(crate) struct ColumnStore {
    schema: Trait,
    columns: Vec<ColumnArray>,
}

impl ColumnStore {
    pub(crate) fn new(trait_: &Trait) -> Self {
        let columns = trait_.fields().iter().map(|f| ColumnArray::new(f.kind)).collect();
        Self {
            schema: trait_.clone(),
            columns,
        }
    }

    pub(crate) fn is_tag(&self) -> bool {
        self.columns.is_empty()
    }

    fn ensure_row(&mut self, row: usize) {
        for (col, field) in self.columns.iter_mut().zip(self.schema.fields()) {
            col.ensure_capacity(row, field.default);
        }
    }

    /// Write a full record (defaults already merged with any caller
    /// partial) at `row`, growing storage as needed.
    pub(crate) fn write_record(&mut self, row: usize, record: &Record) {
        self.ensure_row(row);
        for (name, value) in &record.0 {
            if let Some(idx) = self.schema.field_index(name) {
                match (&mut self.columns[idx], value) {
                    (ColumnArray::Number(v), FieldValue::Number(n)) => v[row] = *n,
                    (ColumnArray::Bool(v), FieldValue::Bool(b)) => v[row] = *b,
                    (ColumnArray::Reference(v), FieldValue::Reference(r)) => v[row] = *r,
                    _ => {}
                }
            }
        }
    }

    pub(crate) fn get(&self, row: usize) -> Record {
        Record(
            self.schema
                .fields()
                .iter()
                .zip(self.columns.iter())
                .map(|(f, col)| (f.name, col.get(row)))
                .collect(),
        )
    }

    /// Field-wise assignment with change detection. Returns `true` iff at
    /// least one field in `partial` differed from the value previously
    /// stored.
    pub(crate) fn set_with_change_detection(&mut self, row: usize, partial: &[FieldAssign]) -> bool {
        self.ensure_row(row);
        let mut any_changed = false;
        for (name, value) in partial {
            if let Some(idx) = self.schema.field_index(name) {
                if self.columns[idx].set_with_change_detection(row, *value) {
                    any_changed = true;
                }
            }
        }
        any_changed
    }

    pub(crate) fn field_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.schema.fields().iter().map(|f| f.name)
    }
}
