//! Resolved method metadata: parameter/return declarations and dispatch kind.

use crate::{FieldType, Metadata, TypeId};

index_vec::define_index_type! {
    /// Unique identifier for a method within a [`Metadata`] registry
    pub struct MethodId = u32;
}

/// How invocations of a method are bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dispatch {
    /// No receiver
    Static,
    /// Has a receiver but is never overridden (private, final or constructor)
    Direct,
    /// Has a receiver and is selected at runtime
    Virtual,
}

/// A declared parameter or return type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamDecl {
    pub ty: FieldType,
    /// Declared as never null
    pub null_free: bool,
}

impl ParamDecl {
    pub const fn new(ty: FieldType, null_free: bool) -> Self {
        Self { ty, null_free }
    }
}

/// Metadata of one method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodMeta {
    pub name: String,
    pub holder: TypeId,
    /// Declared parameters, receiver excluded
    pub params: Vec<ParamDecl>,
    /// `None` for `void` methods
    pub ret: Option<ParamDecl>,
    pub dispatch: Dispatch,
}

impl MethodMeta {
    pub fn new(name: impl Into<String>, holder: TypeId, dispatch: Dispatch) -> Self {
        Self {
            name: name.into(),
            holder,
            params: Vec::new(),
            ret: None,
            dispatch,
        }
    }

    pub fn with_param(mut self, ty: FieldType, null_free: bool) -> Self {
        self.params.push(ParamDecl::new(ty, null_free));
        self
    }

    pub const fn with_return(mut self, ty: FieldType, null_free: bool) -> Self {
        self.ret = Some(ParamDecl::new(ty, null_free));
        self
    }

    /// The receiver declaration, if the method has one. Receivers are never null.
    pub const fn receiver(&self) -> Option<ParamDecl> {
        match self.dispatch {
            Dispatch::Static => None,
            Dispatch::Direct | Dispatch::Virtual => {
                Some(ParamDecl::new(FieldType::Reference(self.holder), true))
            }
        }
    }

    /// Receiver (if any) followed by the declared parameters, in calling-convention order
    pub fn all_params(&self) -> Vec<ParamDecl> {
        self.receiver().into_iter().chain(self.params.iter().copied()).collect()
    }

    /// Whether every invocation of this method binds to this exact implementation
    pub const fn can_be_statically_bound(&self) -> bool {
        !matches!(self.dispatch, Dispatch::Virtual)
    }

    /// `Holder.name`
    pub fn qualified_name(&self, metadata: &Metadata) -> String {
        let holder = metadata
            .get(self.holder)
            .map(|meta| meta.name.as_str())
            .unwrap_or("<unknown>");
        format!("{holder}.{}", self.name)
    }
}
