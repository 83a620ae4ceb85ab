//! The extension-type registry: bidirectional mapping between host types and
//! user-supplied serialization/deserialization handlers.
//!
//! Per-instance storage is a default slot plus a keyed table, which
//! collapses the three states the design calls out ("absent", "single
//! default", "full table") onto two `Option`/`HashMap` primitives: an empty
//! table with no default is absent; a default with an empty table is
//! single-default; any populated table is the full case, with its own
//! default entry preserved. `HashMap::new()` allocates nothing until the
//! first insert, so the common no-custom-types path stays allocation-free.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::value::{HandlerOutcome, Value};

/// One registry slot: either an explicit refusal, or a bound handler.
/// A missing slot (not present in the table, no default) is the third
/// state and is represented by the slot's absence rather than a variant.
#[derive(Clone)]
pub enum Entry<H> {
    Refuse,
    Bind(H),
}

/// A per-instance registry: a keyed table of entries plus a default entry
/// used when a key lookup misses the table.
pub struct Registry<K, H> {
    default: Option<Entry<H>>,
    table: HashMap<K, Entry<H>>,
}

impl<K, H> Default for Registry<K, H> {
    fn default() -> Self {
        Self {
            default: None,
            table: HashMap::new(),
        }
    }
}

impl<K: std::hash::Hash + Eq, H: Clone> Registry<K, H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_default(&mut self, entry: Option<Entry<H>>) {
        self.default = entry;
    }

    /// Inserts, replaces, or (on `None`) removes the entry for `key`.
    /// Inserting a key into a previously-empty table is exactly the
    /// "promotion" the design describes: the existing default is untouched
    /// and keeps serving the table's miss path.
    pub fn set(&mut self, key: K, entry: Option<Entry<H>>) {
        match entry {
            Some(e) => {
                self.table.insert(key, e);
            }
            None => {
                self.table.remove(&key);
            }
        }
    }

    /// Looks up `key` in this instance's table, falling back to its own
    /// default. Does not consult any process-wide registry; callers that
    /// want the full chain should fall through to a process-wide
    /// [`Registry`] themselves when this returns `None`.
    pub fn resolve(&self, key: &K) -> Option<&Entry<H>> {
        self.table.get(key).or(self.default.as_ref())
    }
}

/// A packer-side extension handler. Receives the opaque host value and the
/// packer it should either return a payload for, or write directly into.
pub type PackHandler = Arc<
    dyn Fn(&(dyn std::any::Any + Send + Sync), &mut crate::pack::Packer) -> crate::error::Result<HandlerOutcome>
        + Send
        + Sync,
>;

/// `Some(typecode)` is the high-level form (the packer frames the handler's
/// returned payload); `None` is the low-level form (the handler writes the
/// complete representation itself).
#[derive(Clone)]
pub struct PackBinding {
    pub typecode: Option<i8>,
    pub handler: PackHandler,
}

pub type PackRegistry = Registry<TypeId, PackBinding>;

/// An unpacker-side extension handler: typecode and payload in, a decoded
/// value out.
pub type UnpackHandler =
    Arc<dyn Fn(i8, &[u8]) -> crate::error::Result<Value> + Send + Sync>;

pub type UnpackRegistry = Registry<i8, UnpackHandler>;

fn generic_ext_passthrough(typecode: i8, payload: &[u8]) -> crate::error::Result<Value> {
    Ok(Value::Ext(crate::value::ExtValue::new(
        typecode,
        payload.to_vec(),
    )))
}

/// The process-wide default unpacker registry. Freshly initialized with its
/// default entry bound to a generic passthrough, so that decoding an
/// unregistered extension typecode produces `Value::Ext` rather than an
/// error unless a caller explicitly clears it — see the "unknown-typecode
/// default" testable property.
static DEFAULT_UNPACK_REGISTRY: OnceLock<RwLock<UnpackRegistry>> = OnceLock::new();

/// The process-wide default packer registry. No default entry: an
/// unregistered `TypeId` falls through to the value's own fallback
/// serializer rather than a process-wide handler.
static DEFAULT_PACK_REGISTRY: OnceLock<RwLock<PackRegistry>> = OnceLock::new();

fn default_unpack_registry() -> &'static RwLock<UnpackRegistry> {
    DEFAULT_UNPACK_REGISTRY.get_or_init(|| {
        let mut registry = UnpackRegistry::new();
        registry.set_default(Some(Entry::Bind(Arc::new(generic_ext_passthrough))));
        RwLock::new(registry)
    })
}

fn default_pack_registry() -> &'static RwLock<PackRegistry> {
    DEFAULT_PACK_REGISTRY.get_or_init(|| RwLock::new(PackRegistry::new()))
}

/// Replaces the process-wide default unpacker target for `typecode`.
/// Idempotent: calling this twice with the same arguments leaves the
/// registry in the same observable state. Does not affect unpacker
/// instances that already carry a per-instance entry for this typecode.
pub fn set_default_unpack_entry(typecode: i8, entry: Option<Entry<UnpackHandler>>) {
    let mut registry = default_unpack_registry()
        .write()
        .unwrap_or_else(|poison| poison.into_inner());
    registry.set(typecode, entry);
}

/// Replaces the process-wide default unpacker fallback, used when a
/// typecode has no per-typecode entry anywhere in the resolution chain.
pub fn set_default_unpack_fallback(entry: Option<Entry<UnpackHandler>>) {
    let mut registry = default_unpack_registry()
        .write()
        .unwrap_or_else(|poison| poison.into_inner());
    registry.set_default(entry);
}

/// Resets the process-wide default unpacker registry to its out-of-the-box
/// state (generic extension-value passthrough). Intended for test
/// isolation between cases that customize the default.
pub fn reset_default_unpack_registry() {
    let mut registry = UnpackRegistry::new();
    registry.set_default(Some(Entry::Bind(Arc::new(generic_ext_passthrough))));
    let lock = default_unpack_registry();
    *lock.write().unwrap_or_else(|poison| poison.into_inner()) = registry;
}

pub fn set_default_pack_entry(type_id: TypeId, entry: Option<Entry<PackBinding>>) {
    let mut registry = default_pack_registry()
        .write()
        .unwrap_or_else(|poison| poison.into_inner());
    registry.set(type_id, entry);
}

pub(crate) fn resolve_unpack_entry<'a>(
    instance: &'a UnpackRegistry,
    typecode: i8,
) -> Option<Entry<UnpackHandler>> {
    if let Some(entry) = instance.resolve(&typecode) {
        return Some(entry.clone());
    }
    let global = default_unpack_registry()
        .read()
        .unwrap_or_else(|poison| poison.into_inner());
    global.resolve(&typecode).cloned()
}

pub(crate) fn resolve_pack_entry(
    instance: &PackRegistry,
    type_id: TypeId,
) -> Option<Entry<PackBinding>> {
    if let Some(entry) = instance.resolve(&type_id) {
        return Some(entry.clone());
    }
    let global = default_pack_registry()
        .read()
        .unwrap_or_else(|poison| poison.into_inner());
    global.resolve(&type_id).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_key_falls_back_to_default() {
        let mut registry: Registry<i8, &'static str> = Registry::new();
        registry.set_default(Some(Entry::Bind("fallback")));
        match registry.resolve(&5) {
            Some(Entry::Bind(h)) => assert_eq!(*h, "fallback"),
            _ => panic!("expected fallback"),
        }
    }

    #[test]
    fn inserting_a_key_promotes_without_losing_default() {
        let mut registry: Registry<i8, &'static str> = Registry::new();
        registry.set_default(Some(Entry::Bind("fallback")));
        registry.set(5, Some(Entry::Bind("specific")));
        match registry.resolve(&5) {
            Some(Entry::Bind(h)) => assert_eq!(*h, "specific"),
            _ => panic!("expected specific"),
        }
        match registry.resolve(&6) {
            Some(Entry::Bind(h)) => assert_eq!(*h, "fallback"),
            _ => panic!("expected fallback still reachable"),
        }
    }

    #[test]
    fn refuse_entry_is_distinct_from_absent() {
        let mut registry: Registry<i8, &'static str> = Registry::new();
        assert!(registry.resolve(&1).is_none());
        registry.set(1, Some(Entry::Refuse));
        assert!(matches!(registry.resolve(&1), Some(Entry::Refuse)));
    }

    #[test]
    fn process_wide_unpack_default_reaches_a_fresh_instance() {
        let handler: UnpackHandler = Arc::new(|_typecode: i8, payload: &[u8]| Ok(Value::UInt(payload.len() as u64)));
        set_default_unpack_entry(100, Some(Entry::Bind(handler)));

        let instance = UnpackRegistry::new();
        match resolve_unpack_entry(&instance, 100) {
            Some(Entry::Bind(handler)) => {
                assert_eq!(handler(100, &[1, 2, 3]).unwrap(), Value::UInt(3));
            }
            _ => panic!("expected the process-wide binding to be reachable"),
        }

        set_default_unpack_entry(100, None);
    }

    #[test]
    fn per_instance_unpack_entry_shadows_process_wide_default() {
        let fallback: UnpackHandler = Arc::new(|_typecode: i8, _payload: &[u8]| Ok(Value::Nil));
        set_default_unpack_entry(101, Some(Entry::Bind(fallback)));

        let mut instance = UnpackRegistry::new();
        let specific: UnpackHandler = Arc::new(|_typecode: i8, payload: &[u8]| Ok(Value::UInt(payload.len() as u64)));
        instance.set(101, Some(Entry::Bind(specific)));

        match resolve_unpack_entry(&instance, 101) {
            Some(Entry::Bind(handler)) => {
                assert_eq!(handler(101, &[9, 9]).unwrap(), Value::UInt(2));
            }
            _ => panic!("expected the per-instance binding to win"),
        }

        set_default_unpack_entry(101, None);
    }

    #[test]
    fn process_wide_pack_default_reaches_a_fresh_instance() {
        struct ProcessWideDefaultWidget;
        let type_id = TypeId::of::<ProcessWideDefaultWidget>();
        set_default_pack_entry(type_id, Some(Entry::Refuse));

        let instance = PackRegistry::new();
        assert!(matches!(resolve_pack_entry(&instance, type_id), Some(Entry::Refuse)));

        set_default_pack_entry(type_id, None);
    }

    #[test]
    fn per_instance_pack_entry_shadows_process_wide_default() {
        struct PerInstanceOverrideGadget;
        let type_id = TypeId::of::<PerInstanceOverrideGadget>();
        set_default_pack_entry(type_id, Some(Entry::Refuse));

        let mut instance = PackRegistry::new();
        instance.set(
            type_id,
            Some(Entry::Bind(PackBinding {
                typecode: None,
                handler: Arc::new(
                    |_any: &(dyn std::any::Any + Send + Sync), _packer: &mut crate::pack::Packer| {
                        Ok(HandlerOutcome::WroteDirectly)
                    },
                ),
            })),
        );

        assert!(matches!(resolve_pack_entry(&instance, type_id), Some(Entry::Bind(_))));

        set_default_pack_entry(type_id, None);
    }
}
