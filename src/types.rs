//! Native type model.
//!
//! Converts `syn` types from package source into the closed set of shapes the
//! binding engine knows how to marshal. Anything outside that set becomes
//! [`NativeType::Opaque`] with a reason, and is rejected later by the sanity
//! checker rather than here.

use quote::ToTokens;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use syn::{GenericArgument, PathArguments, Type, TypePath};

const INTEGERS: &[&str] = &[
    "i8", "i16", "i32", "i64", "i128", "isize", "u8", "u16", "u32", "u64", "u128", "usize",
];
const FLOATS: &[&str] = &["f32", "f64"];

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum NativeType {
    Unit,
    Bool,
    Char,
    Integer {
        name: String,
    },
    Float {
        name: String,
    },
    Text {
        borrowed: bool,
    },
    Sequence {
        element: Box<NativeType>,
        borrowed: bool,
    },
    Optional {
        inner: Box<NativeType>,
    },
    /// String-keyed map.
    Map {
        value: Box<NativeType>,
    },
    /// `serde_json::Value`
    Json,
    Tuple {
        elements: Vec<NativeType>,
    },
    Result {
        ok: Box<NativeType>,
        err: Box<NativeType>,
    },
    /// A nominal type: a package struct or some other native handle.
    Named {
        name: String,
        path: String,
        borrowed: bool,
        mutable: bool,
    },
    Opaque {
        rendered: String,
        reason: String,
    },
}

impl NativeType {
    fn opaque(ty: &impl ToTokens, reason: &str) -> Self {
        NativeType::Opaque {
            rendered: render(ty),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for NativeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeType::Unit => write!(f, "()"),
            NativeType::Bool => write!(f, "bool"),
            NativeType::Char => write!(f, "char"),
            NativeType::Integer { name } | NativeType::Float { name } => write!(f, "{}", name),
            NativeType::Text { borrowed: true } => write!(f, "&str"),
            NativeType::Text { borrowed: false } => write!(f, "String"),
            NativeType::Sequence {
                element,
                borrowed: true,
            } => write!(f, "&[{}]", element),
            NativeType::Sequence {
                element,
                borrowed: false,
            } => write!(f, "Vec<{}>", element),
            NativeType::Optional { inner } => write!(f, "Option<{}>", inner),
            NativeType::Map { value } => write!(f, "HashMap<String, {}>", value),
            NativeType::Json => write!(f, "serde_json::Value"),
            NativeType::Tuple { elements } => {
                let parts: Vec<String> = elements.iter().map(|e| e.to_string()).collect();
                write!(f, "({})", parts.join(", "))
            }
            NativeType::Result { ok, err } => write!(f, "Result<{}, {}>", ok, err),
            NativeType::Named {
                path,
                borrowed,
                mutable,
                ..
            } => {
                if *mutable {
                    write!(f, "&mut {}", path)
                } else if *borrowed {
                    write!(f, "&{}", path)
                } else {
                    write!(f, "{}", path)
                }
            }
            NativeType::Opaque { rendered, .. } => write!(f, "{}", rendered),
        }
    }
}

/// Token rendering with the spacing `quote` produces, e.g. `Vec < String >`.
pub fn render(ty: &impl ToTokens) -> String {
    ty.to_token_stream().to_string()
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONVERSION FROM SYN
// ═══════════════════════════════════════════════════════════════════════════════

/// `generics` holds the function's type parameter names; they cannot be
/// marshaled because the concrete type is chosen by the caller.
pub fn from_syn(ty: &Type, generics: &HashSet<String>) -> NativeType {
    match ty {
        Type::Path(path) if path.qself.is_none() => from_path(path, generics),
        Type::Reference(reference) => {
            let mutable = reference.mutability.is_some();
            match &*reference.elem {
                Type::Slice(slice) if !mutable => NativeType::Sequence {
                    element: Box::new(from_syn(&slice.elem, generics)),
                    borrowed: true,
                },
                inner => match from_syn(inner, generics) {
                    NativeType::Text { .. } if !mutable => NativeType::Text { borrowed: true },
                    NativeType::Sequence { element, .. } if !mutable => NativeType::Sequence {
                        element,
                        borrowed: true,
                    },
                    NativeType::Named { name, path, .. } => NativeType::Named {
                        name,
                        path,
                        borrowed: true,
                        mutable,
                    },
                    NativeType::Opaque { reason, .. } => NativeType::opaque(ty, &reason),
                    _ if mutable => NativeType::opaque(ty, "mutable references to script values"),
                    _ => NativeType::opaque(ty, "references to this type are not marshaled"),
                },
            }
        }
        Type::Tuple(tuple) if tuple.elems.is_empty() => NativeType::Unit,
        Type::Tuple(tuple) => NativeType::Tuple {
            elements: tuple.elems.iter().map(|e| from_syn(e, generics)).collect(),
        },
        Type::Paren(paren) => from_syn(&paren.elem, generics),
        Type::Group(group) => from_syn(&group.elem, generics),
        Type::Array(_) => NativeType::opaque(ty, "fixed-size arrays"),
        Type::Slice(_) => NativeType::opaque(ty, "unsized slices"),
        Type::ImplTrait(_) => NativeType::opaque(ty, "impl Trait"),
        Type::TraitObject(_) => NativeType::opaque(ty, "trait objects"),
        Type::BareFn(_) => NativeType::opaque(ty, "function pointers"),
        Type::Ptr(_) => NativeType::opaque(ty, "raw pointers"),
        Type::Never(_) => NativeType::opaque(ty, "the never type"),
        _ => NativeType::opaque(ty, "unsupported type syntax"),
    }
}

fn generic_args(path: &TypePath) -> Vec<&Type> {
    match path.path.segments.last().map(|s| &s.arguments) {
        Some(PathArguments::AngleBracketed(args)) => args
            .args
            .iter()
            .filter_map(|arg| match arg {
                GenericArgument::Type(t) => Some(t),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn from_path(path: &TypePath, generics: &HashSet<String>) -> NativeType {
    let segments: Vec<String> = path
        .path
        .segments
        .iter()
        .map(|s| s.ident.to_string())
        .collect();
    let Some(last) = segments.last() else {
        return NativeType::opaque(path, "empty path");
    };
    let args = generic_args(path);
    let joined = segments.join("::");

    if segments.len() == 1 && generics.contains(last) {
        return NativeType::opaque(path, "generic type parameters");
    }

    match (last.as_str(), args.as_slice()) {
        ("bool", []) => NativeType::Bool,
        ("char", []) => NativeType::Char,
        ("str", []) => NativeType::Text { borrowed: true },
        ("String", []) => NativeType::Text { borrowed: false },
        (name, []) if INTEGERS.contains(&name) => NativeType::Integer {
            name: name.to_string(),
        },
        (name, []) if FLOATS.contains(&name) => NativeType::Float {
            name: name.to_string(),
        },
        ("Vec", [element]) => NativeType::Sequence {
            element: Box::new(from_syn(element, generics)),
            borrowed: false,
        },
        ("Option", [inner]) => NativeType::Optional {
            inner: Box::new(from_syn(inner, generics)),
        },
        ("HashMap" | "BTreeMap", [key, value]) => match from_syn(key, generics) {
            NativeType::Text { borrowed: false } => NativeType::Map {
                value: Box::new(from_syn(value, generics)),
            },
            _ => NativeType::opaque(path, "maps with non-String keys"),
        },
        ("Value", []) if joined == "Value" || joined.ends_with("serde_json::Value") => {
            NativeType::Json
        }
        ("Result", [ok, err]) => NativeType::Result {
            ok: Box::new(from_syn(ok, generics)),
            err: Box::new(from_syn(err, generics)),
        },
        // `io::Result<T>`, `anyhow::Result<T>` and friends
        ("Result", [ok]) => {
            let mut err_path = segments.clone();
            err_path.pop();
            err_path.push("Error".to_string());
            NativeType::Result {
                ok: Box::new(from_syn(ok, generics)),
                err: Box::new(NativeType::Named {
                    name: "Error".to_string(),
                    path: err_path.join("::"),
                    borrowed: false,
                    mutable: false,
                }),
            }
        }
        ("Box" | "Rc" | "Arc" | "Cow" | "RefCell" | "Mutex", _) => {
            NativeType::opaque(path, "smart pointers are not marshaled")
        }
        (name, []) => NativeType::Named {
            name: name.to_string(),
            path: joined,
            borrowed: false,
            mutable: false,
        },
        (_, _) => NativeType::opaque(path, "generic native types"),
    }
}

/// Splits a return type into the ordered sequence of native results.
///
/// `()` yields nothing, a tuple yields its elements, and `Result<T, E>` yields
/// the flattened `T` followed by the error type, tagged so the binding engine
/// knows it came from an `Err` arm.
pub fn flatten_returns(ty: &NativeType) -> Vec<ReturnType> {
    match ty {
        NativeType::Unit => Vec::new(),
        NativeType::Tuple { elements } => elements
            .iter()
            .map(|e| ReturnType {
                ty: e.clone(),
                error_arm: false,
            })
            .collect(),
        NativeType::Result { ok, err } => {
            // Only one level of `Result` is flattened; a nested one stays a value.
            let mut out = match &**ok {
                NativeType::Result { .. } => vec![ReturnType {
                    ty: (**ok).clone(),
                    error_arm: false,
                }],
                _ => flatten_returns(ok),
            };
            out.push(ReturnType {
                ty: (**err).clone(),
                error_arm: true,
            });
            out
        }
        other => vec![ReturnType {
            ty: other.clone(),
            error_arm: false,
        }],
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnType {
    pub ty: NativeType,
    /// True when this position is the `Err` arm of a `Result`.
    pub error_arm: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ty(src: &str) -> NativeType {
        from_syn(&syn::parse_str::<Type>(src).unwrap(), &HashSet::new())
    }

    #[test]
    fn test_scalars() {
        assert_eq!(ty("bool"), NativeType::Bool);
        assert_eq!(ty("u16"), NativeType::Integer { name: "u16".into() });
        assert_eq!(ty("f64"), NativeType::Float { name: "f64".into() });
        assert_eq!(ty("&str"), NativeType::Text { borrowed: true });
        assert_eq!(ty("&String"), NativeType::Text { borrowed: true });
        assert_eq!(ty("String"), NativeType::Text { borrowed: false });
    }

    #[test]
    fn test_sequences() {
        assert_eq!(
            ty("&[u8]"),
            NativeType::Sequence {
                element: Box::new(NativeType::Integer { name: "u8".into() }),
                borrowed: true,
            }
        );
        assert_eq!(ty("Vec<String>").to_string(), "Vec<String>");
    }

    #[test]
    fn test_result_alias_has_error_arm() {
        let flat = flatten_returns(&ty("io::Result<(String, u32)>"));
        assert_eq!(flat.len(), 3);
        assert!(!flat[0].error_arm);
        assert!(flat[2].error_arm);
        assert_eq!(flat[2].ty.to_string(), "io::Error");
    }

    #[test]
    fn test_unmarshalable_types_are_opaque() {
        assert!(matches!(ty("impl Fn()"), NativeType::Opaque { .. }));
        assert!(matches!(ty("&mut u32"), NativeType::Opaque { .. }));
        assert!(matches!(ty("Box<Client>"), NativeType::Opaque { .. }));
        let generics: HashSet<String> = ["T".to_string()].into_iter().collect();
        let t = from_syn(&syn::parse_str::<Type>("T").unwrap(), &generics);
        assert!(matches!(t, NativeType::Opaque { ref reason, .. } if reason.contains("generic")));
    }

    #[test]
    fn test_named_reference_keeps_path() {
        assert_eq!(
            ty("&mut client::Session"),
            NativeType::Named {
                name: "Session".into(),
                path: "client::Session".into(),
                borrowed: true,
                mutable: true,
            }
        );
    }
}
