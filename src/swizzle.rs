//! Native call binding ("swizzling").
//!
//! Every call-site found by the walker is matched against the exported
//! declaration of the package its namespace resolves to. A match yields a
//! [`Binding`]: one conversion descriptor per parameter plus a return shim.
//! Descriptors are chosen by static lookup on the native type and depend on
//! nothing but the call-site and the declaration table, so binding the same
//! inputs twice gives identical output.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::declarations::{NativeFunctionSignature, NativePackage};
use crate::error::{CompileError, Result};
use crate::types::NativeType;
use crate::unit::ScriptUnit;
use crate::visitor::CallSite;

// ═══════════════════════════════════════════════════════════════════════════════
// CONVERSION DESCRIPTORS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    /// Script value into a native parameter.
    Argument,
    /// Native result back into a script value.
    Return,
}

/// How one value crosses the script/native boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Conversion {
    /// Script number widened or narrowed to `kind` (`i32`, `f64`, ...).
    Numeric { kind: String },
    Boolean,
    Text { borrowed: bool, single_char: bool },
    /// Serde marshaling through the script's object representation.
    /// `named` types carry a fully qualified Rust path in `type_name`.
    Structural {
        type_name: String,
        named: bool,
        borrowed: bool,
    },
    Collection {
        element: Box<Conversion>,
        borrowed: bool,
    },
    /// Final `&[T]` parameter; gathers every remaining script argument.
    Variadic { element: Box<Conversion> },
    Optional { inner: Box<Conversion> },
    /// Opaque native value the script can only hand back to native code.
    Handle { type_name: String, borrowed: bool },
    Unresolved { type_name: String, reason: String },
}

impl Conversion {
    /// First unresolved descriptor in this tree, depth first.
    pub fn unresolved(&self) -> Option<(&str, &str)> {
        match self {
            Conversion::Unresolved { type_name, reason } => Some((type_name, reason)),
            Conversion::Collection { element, .. } | Conversion::Variadic { element } => {
                element.unresolved()
            }
            Conversion::Optional { inner } => inner.unresolved(),
            _ => None,
        }
    }

    /// Whether the native side takes this value, or something inside it, by
    /// reference.
    pub fn borrows(&self) -> bool {
        match self {
            Conversion::Text { borrowed, .. }
            | Conversion::Structural { borrowed, .. }
            | Conversion::Handle { borrowed, .. } => *borrowed,
            Conversion::Collection { element, borrowed } => *borrowed || element.borrows(),
            Conversion::Variadic { .. } => true,
            Conversion::Optional { inner } => inner.borrows(),
            _ => false,
        }
    }

    /// A reference taken directly from owned storage, with nothing borrowed
    /// below it: `&str`, `&T`, or a slice of owned elements.
    pub fn is_leaf_borrow(&self) -> bool {
        match self {
            Conversion::Text { borrowed, .. }
            | Conversion::Structural { borrowed, .. }
            | Conversion::Handle { borrowed, .. } => *borrowed,
            Conversion::Collection { element, borrowed } => *borrowed && !element.borrows(),
            _ => false,
        }
    }

    /// Whether a script array is a valid value for this descriptor.
    pub fn takes_arrays(&self) -> bool {
        match self {
            Conversion::Collection { .. }
            | Conversion::Structural { .. }
            | Conversion::Variadic { .. } => true,
            Conversion::Optional { inner } => inner.takes_arrays(),
            _ => false,
        }
    }

    /// A variadic whose elements are never arrays, so a lone array argument
    /// can stand for the whole tail.
    pub fn packs_array(&self) -> bool {
        match self {
            Conversion::Variadic { element } => !element.takes_arrays(),
            _ => false,
        }
    }

    /// Whether the descriptor can be produced with plain serde, i.e. contains no handles.
    pub fn is_serde(&self) -> bool {
        match self {
            Conversion::Handle { .. } | Conversion::Unresolved { .. } => false,
            Conversion::Collection { element, .. } | Conversion::Variadic { element } => {
                element.is_serde()
            }
            Conversion::Optional { inner } => inner.is_serde(),
            _ => true,
        }
    }
}

impl fmt::Display for Conversion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conversion::Numeric { kind } => write!(f, "numeric({})", kind),
            Conversion::Boolean => write!(f, "boolean"),
            Conversion::Text { single_char: true, .. } => write!(f, "text(char)"),
            Conversion::Text { borrowed: true, .. } => write!(f, "text(borrowed)"),
            Conversion::Text { .. } => write!(f, "text"),
            Conversion::Structural { type_name, .. } => write!(f, "structural({})", type_name),
            Conversion::Collection { element, .. } => write!(f, "collection({})", element),
            Conversion::Variadic { element } => write!(f, "variadic({})", element),
            Conversion::Optional { inner } => write!(f, "optional({})", inner),
            Conversion::Handle { type_name, .. } => write!(f, "handle({})", type_name),
            Conversion::Unresolved { type_name, .. } => write!(f, "unresolved({})", type_name),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SHIMS & BINDINGS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArgumentShim {
    pub parameter: String,
    pub native_type: String,
    pub conversion: Conversion,
}

/// How a raised native error becomes the exception message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorFormat {
    Display,
    Debug,
    /// A package type implementing neither trait.
    Unformattable,
}

/// The trailing `Err` arm of a `Result`, raised as a script exception.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorChannel {
    pub native_type: String,
    pub format: ErrorFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnShim {
    /// Delivered values in native order.
    pub values: Vec<Conversion>,
    pub error: Option<ErrorChannel>,
}

impl ReturnShim {
    /// Native return positions covered, error channel included.
    pub fn arity(&self) -> usize {
        self.values.len() + usize::from(self.error.is_some())
    }

    /// Values the script can receive: 0 is `undefined`, 1 is the value itself
    /// and anything more arrives as an array.
    pub fn delivered(&self) -> usize {
        self.values.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Binding {
    pub call_site: CallSite,
    pub import_path: String,
    /// Rust path the shim calls through, e.g. `net_tools::http`.
    pub rust_path: String,
    pub signature: NativeFunctionSignature,
    pub argument_shims: Vec<ArgumentShim>,
    pub return_shim: ReturnShim,
}

impl Binding {
    /// The `(namespace, function)` pair the script calls through.
    pub fn shim_key(&self) -> (&str, &str) {
        (&self.call_site.namespace, &self.call_site.called_name)
    }

    /// Name of the generated shim function. Distinct pairs always get
    /// distinct names.
    pub fn shim_name(&self) -> String {
        format!(
            "__{}__{}",
            encode_ident(&self.call_site.namespace),
            encode_ident(&self.call_site.called_name)
        )
    }
}

/// Escapes a script identifier into Rust identifier characters. `_` only ever
/// starts an escape, so the output never contains `__`.
fn encode_ident(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            c if c.is_ascii_alphanumeric() => out.push(c),
            '_' => out.push_str("_u"),
            '$' => out.push_str("_d"),
            c => out.push_str(&format!("_x{:06x}", u32::from(c))),
        }
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════════════
// DESCRIPTOR SELECTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Paths written in package source are relative to the declaring module.
fn qualify(path: &str, package: &NativePackage) -> String {
    if let Some(rest) = path.strip_prefix("crate::") {
        format!("::{}::{}", package.crate_name(), rest)
    } else if let Some(rest) = path.strip_prefix("self::") {
        format!("::{}::{}", package.rust_path(), rest)
    } else if ["std::", "core::", "alloc::", "::"]
        .iter()
        .any(|root| path.starts_with(root))
    {
        format!("::{}", path.trim_start_matches("::"))
    } else {
        format!("::{}::{}", package.rust_path(), path)
    }
}

/// A package-local struct or enum, looked up by the path written in source.
fn local_struct<'p>(
    path: &str,
    package: &'p NativePackage,
) -> Option<&'p crate::declarations::NativeStruct> {
    let local = path
        .strip_prefix("self::")
        .or_else(|| path.strip_prefix("crate::"))
        .unwrap_or(path);
    if local.contains("::") {
        return None;
    }
    package.structs.get(local)
}

/// Whether serde can carry `ty` in `direction` without any handle.
fn serde_capable(ty: &NativeType, direction: Direction, package: &NativePackage) -> bool {
    match ty {
        NativeType::Bool
        | NativeType::Char
        | NativeType::Integer { .. }
        | NativeType::Float { .. }
        | NativeType::Text { .. }
        | NativeType::Json => true,
        NativeType::Sequence { element, .. } => serde_capable(element, direction, package),
        NativeType::Optional { inner } => serde_capable(inner, direction, package),
        NativeType::Map { value } => serde_capable(value, direction, package),
        NativeType::Tuple { elements } => elements
            .iter()
            .all(|e| serde_capable(e, direction, package)),
        NativeType::Named { path, mutable, .. } if !mutable => {
            match local_struct(path, package) {
                Some(s) => match direction {
                    Direction::Argument => s.deserializable,
                    Direction::Return => s.serializable,
                },
                None => false,
            }
        }
        _ => false,
    }
}

fn unresolved(ty: &NativeType, reason: &str) -> Conversion {
    Conversion::Unresolved {
        type_name: ty.to_string(),
        reason: reason.to_string(),
    }
}

/// Picks the conversion for one native type.
pub fn select_conversion(
    ty: &NativeType,
    direction: Direction,
    package: &NativePackage,
) -> Conversion {
    match ty {
        NativeType::Integer { name } | NativeType::Float { name } => Conversion::Numeric {
            kind: name.clone(),
        },
        NativeType::Bool => Conversion::Boolean,
        NativeType::Char => Conversion::Text {
            borrowed: false,
            single_char: true,
        },
        NativeType::Text { borrowed } => Conversion::Text {
            borrowed: *borrowed,
            single_char: false,
        },
        NativeType::Sequence { element, borrowed } => {
            let element = select_conversion(element, direction, package);
            if direction == Direction::Argument && element.borrows() && !element.is_leaf_borrow() {
                return unresolved(ty, "borrowed values nested inside a borrowed container");
            }
            Conversion::Collection {
                element: Box::new(element),
                borrowed: *borrowed,
            }
        }
        NativeType::Optional { inner } => {
            let inner = select_conversion(inner, direction, package);
            if direction == Direction::Argument && inner.borrows() && !inner.is_leaf_borrow() {
                return unresolved(ty, "borrowed values nested inside a borrowed container");
            }
            Conversion::Optional {
                inner: Box::new(inner),
            }
        }
        NativeType::Map { .. } | NativeType::Json | NativeType::Tuple { .. } => {
            if serde_capable(ty, direction, package) {
                Conversion::Structural {
                    type_name: ty.to_string(),
                    named: false,
                    borrowed: false,
                }
            } else {
                unresolved(ty, "contains values serde cannot carry")
            }
        }
        NativeType::Named {
            path,
            borrowed,
            mutable,
            ..
        } => {
            if *mutable {
                return unresolved(ty, "mutable references cannot cross the script boundary");
            }
            if direction == Direction::Return && *borrowed {
                return unresolved(ty, "borrowed handles cannot be returned to scripts");
            }
            if serde_capable(ty, direction, package) {
                Conversion::Structural {
                    type_name: qualify(path, package),
                    named: true,
                    borrowed: *borrowed,
                }
            } else {
                Conversion::Handle {
                    type_name: qualify(path, package),
                    borrowed: *borrowed,
                }
            }
        }
        NativeType::Unit => unresolved(ty, "unit values are not marshaled"),
        NativeType::Result { .. } => unresolved(ty, "nested Result values"),
        NativeType::Opaque { reason, .. } => unresolved(ty, reason),
    }
}

/// Descriptors for every parameter, in order.
pub fn argument_shims(
    signature: &NativeFunctionSignature,
    package: &NativePackage,
) -> Vec<ArgumentShim> {
    let last = signature.parameter_types.len().saturating_sub(1);
    signature
        .parameter_types
        .iter()
        .enumerate()
        .map(|(i, param)| {
            let conversion = match &param.ty {
                NativeType::Sequence {
                    element,
                    borrowed: true,
                } if i == last => {
                    let element = select_conversion(element, Direction::Argument, package);
                    if element.borrows() && !element.is_leaf_borrow() {
                        unresolved(&param.ty, "borrowed values nested inside a borrowed container")
                    } else {
                        Conversion::Variadic {
                            element: Box::new(element),
                        }
                    }
                }
                ty => select_conversion(ty, Direction::Argument, package),
            };
            ArgumentShim {
                parameter: param.name.clone(),
                native_type: param.ty.to_string(),
                conversion,
            }
        })
        .collect()
}

/// Package types are checked against the recorded derives and impls. Foreign
/// named types are assumed to be `std::error::Error` implementors, which
/// always implement `Display`.
pub fn error_format(ty: &NativeType, package: &NativePackage) -> ErrorFormat {
    match ty {
        NativeType::Bool
        | NativeType::Char
        | NativeType::Integer { .. }
        | NativeType::Float { .. }
        | NativeType::Text { .. }
        | NativeType::Json => ErrorFormat::Display,
        NativeType::Named { path, .. } => match local_struct(path, package) {
            Some(s) if s.displayable => ErrorFormat::Display,
            Some(s) if s.debuggable => ErrorFormat::Debug,
            Some(_) => ErrorFormat::Unformattable,
            None => ErrorFormat::Display,
        },
        _ => ErrorFormat::Debug,
    }
}

/// Only the final flattened position, and only when it is a `Result`'s `Err`
/// arm, becomes the error channel. Everything else is a delivered value.
pub fn return_shim(signature: &NativeFunctionSignature, package: &NativePackage) -> ReturnShim {
    let mut returns = signature.return_types.as_slice();
    let mut error = None;
    if let Some((last, rest)) = returns.split_last() {
        if last.error_arm {
            error = Some(ErrorChannel {
                native_type: last.ty.to_string(),
                format: error_format(&last.ty, package),
            });
            returns = rest;
        }
    }

    ReturnShim {
        values: returns
            .iter()
            .map(|r| select_conversion(&r.ty, Direction::Return, package))
            .collect(),
        error,
    }
}

/// Binds one call-site to a known declaration.
pub fn bind(
    call_site: &CallSite,
    package: &NativePackage,
    signature: &NativeFunctionSignature,
) -> Binding {
    Binding {
        call_site: call_site.clone(),
        import_path: package.import_path.clone(),
        rust_path: package.rust_path(),
        signature: signature.clone(),
        argument_shims: argument_shims(signature, package),
        return_shim: return_shim(signature, package),
    }
}

/// Binds every call-site of a unit, in call-site order.
pub fn swizzle_unit(unit: &ScriptUnit) -> Result<Vec<Binding>> {
    unit.call_sites
        .iter()
        .map(|site| {
            let signature = unit
                .packages
                .get(&site.namespace)
                .and_then(|package| Some((package, package.exported(&site.called_name)?)));
            match signature {
                Some((package, signature)) => Ok(bind(site, package, signature)),
                None => Err(CompileError::UnknownNativeFunction {
                    unit: unit.file_name.clone(),
                    namespace: site.namespace.clone(),
                    name: site.called_name.clone(),
                    location: site.location,
                }),
            }
        })
        .collect()
}
