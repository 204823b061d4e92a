//! # Heap Model
//!
//! A byte-addressed, sparsely paged heap with a bump allocator. It is the object
//! model shared by the MIR interpreter, the runtime substitutability snippet and
//! the simulated machine.
//!
//! - Pages are allocated lazily on first write; reads of untouched memory return
//!   zero without allocating.
//! - Addresses below [`HEAP_BASE`] are never valid, so `0` doubles as null.
//! - Every object starts with the header described in [`crate::meta`]. The mark
//!   word carries [`IDENTITY_MASK`] for objects with identity.

use rustc_hash::FxHashMap;

use crate::meta::{
    align_up, ArrayShape, ARRAY_BASE_OFFSET, ARRAY_LENGTH_OFFSET, HUB_OFFSET, MARK_OFFSET,
};
use crate::{HeapError, Kind, Metadata, TypeId, TypeShape};

/// A heap address; `0` is null
pub type Address = u64;

/// The null reference
pub const NULL: Address = 0;
/// First address handed out by the allocator
pub const HEAP_BASE: Address = 0x10_0000;
/// Bytes per lazily allocated page
pub const PAGE_SIZE: u64 = 1 << 12;
/// Mark word bits of a fresh, unlocked object
pub const UNLOCKED_MARK: u64 = 0b01;
/// Mark word bit set on every object that has identity
pub const IDENTITY_MASK: u64 = 1 << 2;

/// Sparse paged heap
#[derive(Debug, Clone)]
pub struct Heap {
    pages: FxHashMap<u64, Box<[u8]>>,
    top: Address,
    allocations: usize,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    pub fn new() -> Self {
        Self {
            pages: FxHashMap::default(),
            top: HEAP_BASE,
            allocations: 0,
        }
    }

    /// Number of objects allocated so far
    pub const fn allocation_count(&self) -> usize {
        self.allocations
    }

    /// Allocates a zeroed instance of a non-array type and initializes its header
    pub fn allocate(&mut self, metadata: &Metadata, ty: TypeId) -> Result<Address, HeapError> {
        let meta = metadata.ty(ty);
        let identity = match meta.shape {
            TypeShape::Identity => true,
            TypeShape::Value => false,
            TypeShape::Abstract | TypeShape::Array(_) => {
                return Err(HeapError::NotInstantiable(meta.name.clone()))
            }
        };
        let address = self.bump(meta.instance_size);
        self.init_header(address, meta.hub, identity)?;
        Ok(address)
    }

    /// Allocates a zeroed array with `length` elements
    pub fn allocate_array(
        &mut self,
        metadata: &Metadata,
        ty: TypeId,
        length: u32,
    ) -> Result<Address, HeapError> {
        let meta = metadata.ty(ty);
        let Some(shape) = meta.array_shape() else {
            return Err(HeapError::NotInstantiable(meta.name.clone()));
        };
        let size = ARRAY_BASE_OFFSET + length * metadata.array_element_size(&shape);
        let address = self.bump(size);
        self.init_header(address, meta.hub, true)?;
        self.write(address + ARRAY_LENGTH_OFFSET as u64, Kind::Int, length as u64)?;
        Ok(address)
    }

    fn bump(&mut self, size: u32) -> Address {
        let address = self.top;
        self.top += align_up(size.max(8), 8) as u64;
        self.allocations += 1;
        address
    }

    fn init_header(&mut self, address: Address, hub: u64, identity: bool) -> Result<(), HeapError> {
        let mark = if identity {
            UNLOCKED_MARK | IDENTITY_MASK
        } else {
            UNLOCKED_MARK
        };
        self.write(address + MARK_OFFSET as u64, Kind::Long, mark)?;
        self.write(address + HUB_OFFSET as u64, Kind::Long, hub)
    }

    fn check(&self, address: Address, size: u32) -> Result<(), HeapError> {
        if address < HEAP_BASE {
            return Err(HeapError::NullDereference);
        }
        if address + size as u64 > self.top {
            return Err(HeapError::OutOfBounds(address));
        }
        Ok(())
    }

    /// Reads a value of `kind` and widens it to slot bits
    pub fn read(&self, address: Address, kind: Kind) -> Result<u64, HeapError> {
        let size = kind.byte_size();
        self.check(address, size)?;
        let mut raw = 0u64;
        for i in 0..size as u64 {
            raw |= (self.byte(address + i) as u64) << (8 * i);
        }
        Ok(kind.widen(raw))
    }

    /// Writes the low bits of `bits` as a value of `kind`
    pub fn write(&mut self, address: Address, kind: Kind, bits: u64) -> Result<(), HeapError> {
        let size = kind.byte_size();
        self.check(address, size)?;
        let raw = kind.narrow(bits);
        for i in 0..size as u64 {
            self.set_byte(address + i, (raw >> (8 * i)) as u8);
        }
        Ok(())
    }

    fn byte(&self, address: Address) -> u8 {
        self.pages
            .get(&(address / PAGE_SIZE))
            .map_or(0, |page| page[(address % PAGE_SIZE) as usize])
    }

    fn set_byte(&mut self, address: Address, value: u8) {
        let page = self
            .pages
            .entry(address / PAGE_SIZE)
            .or_insert_with(|| vec![0u8; PAGE_SIZE as usize].into_boxed_slice());
        page[(address % PAGE_SIZE) as usize] = value;
    }

    /// The hub stored in an object's header
    pub fn hub(&self, object: Address) -> Result<u64, HeapError> {
        self.read(object + HUB_OFFSET as u64, Kind::Long)
    }

    /// The mark word stored in an object's header
    pub fn mark(&self, object: Address) -> Result<u64, HeapError> {
        self.read(object + MARK_OFFSET as u64, Kind::Long)
    }

    /// Whether the object's header carries the identity bit
    pub fn has_identity(&self, object: Address) -> Result<bool, HeapError> {
        Ok(self.mark(object)? & IDENTITY_MASK != 0)
    }

    /// The runtime type of an object
    pub fn type_of(&self, metadata: &Metadata, object: Address) -> Result<TypeId, HeapError> {
        let hub = self.hub(object)?;
        metadata.type_of_hub(hub).ok_or(HeapError::UnknownHub(hub))
    }

    /// The length of an array
    pub fn array_length(&self, metadata: &Metadata, array: Address) -> Result<u32, HeapError> {
        self.array_shape(metadata, array)?;
        Ok(self.read(array + ARRAY_LENGTH_OFFSET as u64, Kind::Int)? as u32)
    }

    /// The element layout of an array object
    pub fn array_shape(&self, metadata: &Metadata, array: Address) -> Result<ArrayShape, HeapError> {
        let ty = self.type_of(metadata, array)?;
        metadata
            .ty(ty)
            .array_shape()
            .ok_or(HeapError::NotAnArray(array))
    }

    /// Address of element `index`, bounds-checked
    pub fn element_address(
        &self,
        metadata: &Metadata,
        array: Address,
        index: i64,
    ) -> Result<Address, HeapError> {
        let shape = self.array_shape(metadata, array)?;
        let length = self.read(array + ARRAY_LENGTH_OFFSET as u64, Kind::Int)? as u32;
        if index < 0 || index >= length as i64 {
            return Err(HeapError::IndexOutOfBounds { index, length });
        }
        let stride = metadata.array_element_size(&shape) as u64;
        Ok(array + ARRAY_BASE_OFFSET as u64 + index as u64 * stride)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> (Metadata, TypeId, TypeId) {
        let mut metadata = Metadata::new();
        let point = metadata
            .value_class("Point")
            .field("x", Kind::Int)
            .field("y", Kind::Int)
            .build()
            .unwrap();
        let node = metadata
            .identity_class("Node")
            .field("v", Kind::Long)
            .build()
            .unwrap();
        (metadata, point, node)
    }

    #[test]
    fn test_identity_bit_follows_type_shape() {
        let (metadata, point, node) = metadata();
        let mut heap = Heap::new();
        let p = heap.allocate(&metadata, point).unwrap();
        let n = heap.allocate(&metadata, node).unwrap();
        assert!(!heap.has_identity(p).unwrap());
        assert!(heap.has_identity(n).unwrap());
        assert_eq!(heap.type_of(&metadata, p).unwrap(), point);
        assert_eq!(heap.allocation_count(), 2);
    }

    #[test]
    fn test_read_write_widens_by_kind() {
        let (metadata, point, _) = metadata();
        let mut heap = Heap::new();
        let p = heap.allocate(&metadata, point).unwrap();
        heap.write(p + 16, Kind::Int, (-7i64) as u64).unwrap();
        assert_eq!(heap.read(p + 16, Kind::Int).unwrap() as i64, -7);
        assert_eq!(heap.read(p + 20, Kind::Int).unwrap(), 0);
    }

    #[test]
    fn test_null_and_out_of_bounds_accesses_fault() {
        let heap = Heap::new();
        assert_eq!(heap.read(NULL + 16, Kind::Int), Err(HeapError::NullDereference));
        assert_eq!(
            heap.read(HEAP_BASE, Kind::Long),
            Err(HeapError::OutOfBounds(HEAP_BASE))
        );
    }

    #[test]
    fn test_array_bounds() {
        let (mut metadata, point, _) = metadata();
        let array = metadata
            .array_of(crate::FieldType::Reference(point), true, true)
            .unwrap();
        let mut heap = Heap::new();
        let a = heap.allocate_array(&metadata, array, 10).unwrap();
        assert_eq!(heap.array_length(&metadata, a).unwrap(), 10);
        assert_eq!(heap.element_address(&metadata, a, 3).unwrap(), a + 24 + 24);
        assert_eq!(
            heap.element_address(&metadata, a, 10),
            Err(HeapError::IndexOutOfBounds {
                index: 10,
                length: 10
            })
        );
    }
}
