// File: src/table.rs
//
// Open-addressed, power-of-two-capacity hash tables. Two
// variants share the same probing/tombstone/rehash scheme: `StringTable`
// keyed by interned String pointers (globals, class methods, instance
// fields, and the interning registry itself) and `ValueTable` keyed by
// arbitrary hashable Values (the language-level Table object).

use crate::object::{ObjKind, ObjRef};
use crate::value::Value;

const INITIAL_CAPACITY: usize = 8;
const MAX_LOAD_FACTOR: f64 = 0.75;

/// Hashes a Value: strings via their cached FNV-1a hash, numbers via bit
/// pattern with -0 normalized to +0, booleans/null/handles by a fixed or
/// bit-pattern hash, other object kinds by pointer identity.
pub fn hash_value(v: &Value) -> u32 {
    match v {
        Value::Null => 0x9e37_79b1,
        Value::Bool(false) => 0xdead_0000,
        Value::Bool(true) => 0xdead_0001,
        Value::Number(n) => {
            let normalized = if *n == 0.0 { 0.0 } else { *n };
            let bits = normalized.to_bits();
            (bits ^ (bits >> 32)) as u32
        }
        Value::Handle(h) => (*h ^ (*h >> 32)) as u32,
        Value::Obj(o) => match &o.get().kind {
            ObjKind::String(s) => s.hash,
            _ => {
                let ptr = o.addr() as u64;
                (ptr ^ (ptr >> 32)) as u32
            }
        },
    }
}

#[derive(Clone)]
struct StrEntry {
    key: Option<ObjRef>,
    value: Value,
    tombstone: bool,
}

impl StrEntry {
    fn empty() -> Self {
        Self { key: None, value: Value::Null, tombstone: false }
    }
}

/// String-keyed table: used for module globals, class method tables,
/// instance field tables, and (with values ignored) the VM's string
/// interning registry.
pub struct StringTable {
    entries: Vec<StrEntry>,
    live: usize,
}

impl StringTable {
    pub fn new() -> Self {
        Self { entries: Vec::new(), live: 0 }
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    fn capacity(&self) -> usize {
        self.entries.len()
    }

    fn find_slot(entries: &[StrEntry], capacity: usize, key: ObjRef, hash: u32) -> usize {
        let mut index = (hash as usize) & (capacity - 1);
        let mut tombstone: Option<usize> = None;
        loop {
            let e = &entries[index];
            match e.key {
                None => {
                    if e.tombstone {
                        if tombstone.is_none() {
                            tombstone = Some(index);
                        }
                    } else {
                        return tombstone.unwrap_or(index);
                    }
                }
                Some(k) if k == key => return index,
                Some(_) => {}
            }
            index = (index + 1) & (capacity - 1);
        }
    }

    fn grow(&mut self) {
        let new_capacity = if self.entries.is_empty() { INITIAL_CAPACITY } else { self.capacity() * 2 };
        let mut new_entries = vec![StrEntry::empty(); new_capacity];
        let mut live = 0;
        for e in self.entries.drain(..) {
            if let Some(k) = e.key {
                let hash = k.as_string().expect("string table key must be a String").hash;
                let slot = Self::find_slot(&new_entries, new_capacity, k, hash);
                new_entries[slot] = StrEntry { key: Some(k), value: e.value, tombstone: false };
                live += 1;
            }
        }
        self.entries = new_entries;
        self.live = live;
    }

    /// Inserts or updates `key -> value`. Returns true if `key` was not
    /// already present.
    pub fn put(&mut self, key: ObjRef, value: Value) -> bool {
        if self.entries.is_empty() || (self.live + 1) as f64 > self.capacity() as f64 * MAX_LOAD_FACTOR {
            self.grow();
        }
        let hash = key.as_string().expect("string table key must be a String").hash;
        let capacity = self.capacity();
        let slot = Self::find_slot(&self.entries, capacity, key, hash);
        let is_new = self.entries[slot].key.is_none();
        if is_new {
            self.live += 1;
        }
        self.entries[slot] = StrEntry { key: Some(key), value, tombstone: false };
        is_new
    }

    pub fn get(&self, key: ObjRef) -> Option<Value> {
        if self.entries.is_empty() {
            return None;
        }
        let hash = key.as_string().expect("string table key must be a String").hash;
        let capacity = self.capacity();
        let slot = Self::find_slot(&self.entries, capacity, key, hash);
        self.entries[slot].key.map(|_| self.entries[slot].value)
    }

    pub fn delete(&mut self, key: ObjRef) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let hash = key.as_string().expect("string table key must be a String").hash;
        let capacity = self.capacity();
        let slot = Self::find_slot(&self.entries, capacity, key, hash);
        if self.entries[slot].key.is_none() {
            return false;
        }
        self.entries[slot] = StrEntry { key: None, value: Value::Null, tombstone: true };
        self.live -= 1;
        true
    }

    /// Looks up an interned string by raw bytes without requiring an
    /// `ObjRef` to already exist — the operation the interning registry
    /// needs before it knows whether a `String` object for `bytes` exists.
    pub fn find_interned(&self, bytes: &str, hash: u32) -> Option<ObjRef> {
        if self.entries.is_empty() {
            return None;
        }
        let capacity = self.capacity();
        let mut index = (hash as usize) & (capacity - 1);
        loop {
            let e = &self.entries[index];
            match e.key {
                None if !e.tombstone => return None,
                Some(k) => {
                    let s = k.as_string().expect("string table key must be a String");
                    if s.hash == hash && s.bytes.as_ref() == bytes {
                        return Some(k);
                    }
                }
                _ => {}
            }
            index = (index + 1) & (capacity - 1);
        }
    }

    /// Registers `key` in the interning registry without an associated
    /// value (used by the weak interning table).
    pub fn intern_insert(&mut self, key: ObjRef) {
        self.put(key, Value::Bool(true));
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjRef, Value)> + '_ {
        self.entries.iter().filter_map(|e| e.key.map(|k| (k, e.value)))
    }

    /// Before sweep: entries whose key String is unmarked are removed so
    /// the registry does not root every ever-interned string ("string-table
    /// weakening").
    pub fn retain_marked_keys(&mut self) {
        for e in self.entries.iter_mut() {
            if let Some(k) = e.key {
                if !k.marked() {
                    *e = StrEntry { key: None, value: Value::Null, tombstone: true };
                    self.live -= 1;
                }
            }
        }
    }
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
struct ValEntry {
    key: Option<Value>,
    value: Value,
    tombstone: bool,
}

impl ValEntry {
    fn empty() -> Self {
        Self { key: None, value: Value::Null, tombstone: false }
    }
}

/// Value-keyed table backing the language-level Table object.
pub struct ValueTable {
    entries: Vec<ValEntry>,
    live: usize,
}

impl ValueTable {
    pub fn new() -> Self {
        Self { entries: Vec::new(), live: 0 }
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    fn capacity(&self) -> usize {
        self.entries.len()
    }

    fn find_slot(entries: &[ValEntry], capacity: usize, key: &Value, hash: u32) -> usize {
        let mut index = (hash as usize) & (capacity - 1);
        let mut tombstone: Option<usize> = None;
        loop {
            let e = &entries[index];
            match &e.key {
                None => {
                    if e.tombstone {
                        if tombstone.is_none() {
                            tombstone = Some(index);
                        }
                    } else {
                        return tombstone.unwrap_or(index);
                    }
                }
                Some(k) if k == key => return index,
                Some(_) => {}
            }
            index = (index + 1) & (capacity - 1);
        }
    }

    fn grow(&mut self) {
        let new_capacity = if self.entries.is_empty() { INITIAL_CAPACITY } else { self.capacity() * 2 };
        let mut new_entries = vec![ValEntry::empty(); new_capacity];
        let mut live = 0;
        for e in self.entries.drain(..) {
            if let Some(k) = e.key {
                let hash = hash_value(&k);
                let slot = Self::find_slot(&new_entries, new_capacity, &k, hash);
                new_entries[slot] = ValEntry { key: Some(k), value: e.value, tombstone: false };
                live += 1;
            }
        }
        self.entries = new_entries;
        self.live = live;
    }

    pub fn put(&mut self, key: Value, value: Value) -> bool {
        if self.entries.is_empty() || (self.live + 1) as f64 > self.capacity() as f64 * MAX_LOAD_FACTOR {
            self.grow();
        }
        let hash = hash_value(&key);
        let capacity = self.capacity();
        let slot = Self::find_slot(&self.entries, capacity, &key, hash);
        let is_new = self.entries[slot].key.is_none();
        if is_new {
            self.live += 1;
        }
        self.entries[slot] = ValEntry { key: Some(key), value, tombstone: false };
        is_new
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        if self.entries.is_empty() {
            return None;
        }
        let hash = hash_value(key);
        let capacity = self.capacity();
        let slot = Self::find_slot(&self.entries, capacity, key, hash);
        self.entries[slot].key.as_ref().map(|_| self.entries[slot].value)
    }

    pub fn delete(&mut self, key: &Value) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let hash = hash_value(key);
        let capacity = self.capacity();
        let slot = Self::find_slot(&self.entries, capacity, key, hash);
        if self.entries[slot].key.is_none() {
            return false;
        }
        self.entries[slot] = ValEntry { key: None, value: Value::Null, tombstone: true };
        self.live -= 1;
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().filter_map(|e| e.key.as_ref().map(|k| (k, &e.value)))
    }
}

impl Default for ValueTable {
    fn default() -> Self {
        Self::new()
    }
}

/// FNV-1a, 32-bit, as specified for cached String hashes.
pub fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Heap;

    #[test]
    fn string_table_put_get_delete() {
        let mut heap = Heap::new();
        let mut table = StringTable::new();
        let k1 = heap.intern("alpha");
        let k2 = heap.intern("beta");
        assert!(table.put(k1, Value::Number(1.0)));
        assert!(table.put(k2, Value::Number(2.0)));
        assert!(!table.put(k1, Value::Number(3.0)));
        assert_eq!(table.get(k1), Some(Value::Number(3.0)));
        assert!(table.delete(k2));
        assert_eq!(table.get(k2), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn value_table_handles_many_entries_and_rehash() {
        let mut table = ValueTable::new();
        for i in 0..200 {
            table.put(Value::Number(i as f64), Value::Number((i * 2) as f64));
        }
        for i in 0..200 {
            assert_eq!(table.get(&Value::Number(i as f64)), Some(Value::Number((i * 2) as f64)));
        }
        assert_eq!(table.len(), 200);
    }

    #[test]
    fn negative_zero_and_positive_zero_share_a_slot() {
        let mut table = ValueTable::new();
        table.put(Value::Number(0.0), Value::Bool(true));
        assert_eq!(table.get(&Value::Number(-0.0)), Some(Value::Bool(true)));
    }
}
