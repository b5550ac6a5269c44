//! Identifiers and cell descriptors shared by every part of the bridge.

use std::fmt;

/// Identity of a GC cell as seen by the bridge.
///
/// The bridge never dereferences cells; it only passes identities back to
/// the [`GcEngine`](crate::engine::GcEngine) that owns them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(pub u64);

/// Heap partition that can be collected independently of the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ZoneId(pub u32);

impl ZoneId {
    /// The atoms zone holds cells shared across every other zone. Holders
    /// that are otherwise single-zone may still point into it.
    pub const ATOMS: ZoneId = ZoneId(0);

    pub fn is_atoms(self) -> bool {
        self == Self::ATOMS
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_atoms() {
            write!(f, "zone(atoms)")
        } else {
            write!(f, "zone({})", self.0)
        }
    }
}

/// Opaque identity of a native holder. Pointer-sized, never dereferenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HolderId(pub usize);

/// Opaque handle to a node of the reference-counted native graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeRef(pub usize);

/// Kind of a GC cell, mirroring the engine's trace kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceKind {
    Object,
    Function,
    String,
    Symbol,
    Script,
    Shape,
    BaseShape,
    Scope,
    RegExpShared,
    BigInt,
    JitCode,
}

impl TraceKind {
    /// Whether the cycle collector models cells of this kind as graph nodes.
    ///
    /// Everything else is either a leaf that can never be part of a cycle
    /// (strings, symbols, bigints) or structural metadata that is walked
    /// through transparently.
    pub fn is_cc_kind(self) -> bool {
        matches!(
            self,
            TraceKind::Object
                | TraceKind::Function
                | TraceKind::Script
                | TraceKind::Scope
                | TraceKind::RegExpShared
        )
    }

    /// Kinds that never have children worth walking.
    pub fn is_leaf(self) -> bool {
        matches!(self, TraceKind::String | TraceKind::Symbol | TraceKind::BigInt)
    }

    pub fn is_object(self) -> bool {
        matches!(self, TraceKind::Object | TraceKind::Function)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TraceKind::Object => "Object",
            TraceKind::Function => "Function",
            TraceKind::String => "String",
            TraceKind::Symbol => "Symbol",
            TraceKind::Script => "Script",
            TraceKind::Shape => "Shape",
            TraceKind::BaseShape => "BaseShape",
            TraceKind::Scope => "Scope",
            TraceKind::RegExpShared => "RegExpShared",
            TraceKind::BigInt => "BigInt",
            TraceKind::JitCode => "JitCode",
        }
    }
}

impl fmt::Display for TraceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mark color of a cell as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellColor {
    Black,
    Gray,
    Unmarked,
}

impl CellColor {
    pub fn is_gray(self) -> bool {
        self == CellColor::Gray
    }
}

/// A reference to a GC cell: identity, kind and owning zone.
///
/// Color is not part of the reference because it changes during marking;
/// ask the engine for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GcCell {
    pub id: CellId,
    pub kind: TraceKind,
    pub zone: ZoneId,
}

impl GcCell {
    pub fn new(id: u64, kind: TraceKind, zone: ZoneId) -> Self {
        Self {
            id: CellId(id),
            kind,
            zone,
        }
    }

    pub fn is_cc_kind(&self) -> bool {
        self.kind.is_cc_kind()
    }
}

impl fmt::Display for GcCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{} in {}", self.kind, self.id.0, self.zone)
    }
}
