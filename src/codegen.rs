//! Codegen module for native shims
//!
//! Turns a unit's bindings into Rust source for the generated program: one shim
//! per distinct `(namespace, function)` pair and a `register` function that
//! exposes them under their namespace objects. Shims marshal through the
//! `runtime` helpers written alongside them by the preload stage.

use proc_macro2::{Ident, Span, TokenStream};
use quote::{format_ident, quote};
use std::collections::BTreeMap;

use crate::error::{CompileError, Result};
use crate::swizzle::{Binding, Conversion, ErrorFormat};
use crate::unit::ScriptUnit;

// ═══════════════════════════════════════════════════════════════════════════════
// NAMING
// ═══════════════════════════════════════════════════════════════════════════════

pub fn shim_ident(binding: &Binding) -> Ident {
    Ident::new(&binding.shim_name(), Span::call_site())
}

fn parse_type(type_name: &str) -> Result<syn::Type, String> {
    syn::parse_str(type_name).map_err(|e| format!("invalid type '{}': {}", type_name, e))
}

fn numeric_ident(kind: &str) -> Ident {
    Ident::new(kind, Span::call_site())
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONVERSIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Expression converting `source` (a `&runtime::Value`) into the native value.
fn argument_expr(conversion: &Conversion, source: TokenStream) -> Result<TokenStream, String> {
    Ok(match conversion {
        Conversion::Numeric { kind } => {
            let kind = numeric_ident(kind);
            quote! { (runtime::number(#source)? as #kind) }
        }
        Conversion::Boolean => quote! { runtime::boolean(#source)? },
        Conversion::Text {
            single_char: true, ..
        } => quote! { runtime::character(#source)? },
        Conversion::Text { .. } => quote! { runtime::text(#source)? },
        Conversion::Structural {
            type_name,
            named: true,
            ..
        } => {
            let ty = parse_type(type_name)?;
            quote! { runtime::structural::<#ty>(#source)? }
        }
        Conversion::Structural { .. } => quote! { runtime::structural(#source)? },
        Conversion::Collection { element, .. } => {
            let inner = argument_expr(element, quote! { item })?;
            quote! {
                runtime::array(#source)?
                    .iter()
                    .map(|item| -> runtime::Result<_> { Ok(#inner) })
                    .collect::<runtime::Result<Vec<_>>>()?
            }
        }
        Conversion::Optional { inner } => {
            let inner = argument_expr(inner, quote! { item })?;
            quote! {
                match runtime::optional(#source) {
                    Some(item) => Some(#inner),
                    None => None,
                }
            }
        }
        Conversion::Handle {
            type_name,
            borrowed: true,
        } => {
            let ty = parse_type(type_name)?;
            quote! { runtime::handle::<#ty>(#source)? }
        }
        Conversion::Handle { type_name, .. } => {
            let ty = parse_type(type_name)?;
            quote! { runtime::handle_owned::<#ty>(#source)? }
        }
        Conversion::Variadic { .. } => return Err("variadic conversion out of position".into()),
        Conversion::Unresolved { type_name, reason } => {
            return Err(format!("no conversion for {} ({})", type_name, reason))
        }
    })
}

/// Expression converting the owned native value `source` into a `runtime::Value`.
fn return_expr(conversion: &Conversion, source: TokenStream) -> Result<TokenStream, String> {
    if conversion.is_serde() {
        return Ok(quote! { runtime::to_value(&#source)? });
    }
    Ok(match conversion {
        Conversion::Handle { .. } => quote! { runtime::store(#source) },
        Conversion::Collection { element, borrowed } => {
            let inner = return_expr(element, quote! { item })?;
            let items = if *borrowed {
                quote! { #source.iter().cloned() }
            } else {
                quote! { #source.into_iter() }
            };
            quote! {
                runtime::Value::Array(
                    #items
                        .map(|item| -> runtime::Result<_> { Ok(#inner) })
                        .collect::<runtime::Result<Vec<_>>>()?,
                )
            }
        }
        Conversion::Optional { inner } => {
            let inner = return_expr(inner, quote! { item })?;
            quote! {
                match #source {
                    Some(item) => #inner,
                    None => runtime::Value::Null,
                }
            }
        }
        Conversion::Unresolved { type_name, reason } => {
            return Err(format!("no conversion for {} ({})", type_name, reason))
        }
        other => return Err(format!("{} cannot be returned", other)),
    })
}

fn is_borrowed(conversion: &Conversion) -> bool {
    match conversion {
        Conversion::Text { borrowed, .. }
        | Conversion::Structural { borrowed, .. }
        | Conversion::Collection { borrowed, .. }
        | Conversion::Handle { borrowed, .. } => *borrowed,
        Conversion::Variadic { .. } => true,
        _ => false,
    }
}

/// Borrowed view of one owned value reached through the reference `item`.
fn leaf_view(conversion: &Conversion, item: TokenStream) -> Result<TokenStream, String> {
    Ok(match conversion {
        Conversion::Text { borrowed: true, .. } => quote! { #item.as_str() },
        Conversion::Structural { borrowed: true, .. } => quote! { #item },
        Conversion::Handle { borrowed: true, .. } => quote! { ::std::ops::Deref::deref(#item) },
        Conversion::Collection { borrowed: true, .. } => quote! { #item.as_slice() },
        other => return Err(format!("{} cannot be borrowed from owned storage", other)),
    })
}

/// Expression handing the owned storage `local` to the native parameter.
/// Containers of borrowed values get a second local holding the borrows.
fn pass_argument(
    conversion: &Conversion,
    local: &Ident,
    index: usize,
    statements: &mut Vec<TokenStream>,
) -> Result<TokenStream, String> {
    let element = match conversion {
        Conversion::Optional { inner } if inner.borrows() => {
            let view = leaf_view(inner, quote! { item })?;
            return Ok(quote! { #local.as_ref().map(|item| #view) });
        }
        Conversion::Collection { element, .. } | Conversion::Variadic { element }
            if element.borrows() =>
        {
            element
        }
        conversion if is_borrowed(conversion) => return Ok(quote! { &#local }),
        _ => return Ok(quote! { #local }),
    };

    let views = format_ident!("__view{}", index);
    let view = leaf_view(element, quote! { item })?;
    statements.push(quote! {
        let #views: Vec<_> = #local.iter().map(|item| #view).collect();
    });
    Ok(if is_borrowed(conversion) {
        quote! { &#views }
    } else {
        quote! { #views }
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// SHIMS
// ═══════════════════════════════════════════════════════════════════════════════

fn generate_shim(binding: &Binding) -> Result<TokenStream, String> {
    let name = shim_ident(binding);
    let callee: syn::Path = syn::parse_str(&format!(
        "::{}::{}",
        binding.rust_path, binding.signature.name
    ))
    .map_err(|e| format!("invalid native path: {}", e))?;

    let mut statements = Vec::new();
    let mut call_args = Vec::new();
    for (i, shim) in binding.argument_shims.iter().enumerate() {
        let local = format_ident!("__arg{}", i);
        let value = match &shim.conversion {
            Conversion::Variadic { element } => {
                let inner = argument_expr(element, quote! { item })?;
                let tail = if shim.conversion.packs_array() {
                    quote! { runtime::rest_or_packed(args, #i) }
                } else {
                    quote! { runtime::rest(args, #i) }
                };
                quote! {
                    #tail
                        .iter()
                        .map(|item| -> runtime::Result<_> { Ok(#inner) })
                        .collect::<runtime::Result<Vec<_>>>()?
                }
            }
            conversion => argument_expr(conversion, quote! { runtime::arg(args, #i) })?,
        };
        statements.push(quote! { let #local = #value; });
        call_args.push(pass_argument(&shim.conversion, &local, i, &mut statements)?);
    }

    statements.push(quote! { let __ret = #callee(#(#call_args),*); });
    if let Some(channel) = &binding.return_shim.error {
        let raise = match channel.format {
            ErrorFormat::Display => quote! { runtime::raise(&err) },
            ErrorFormat::Debug => quote! { runtime::raise_debug(&err) },
            ErrorFormat::Unformattable => {
                return Err(format!("error type {} cannot be formatted", channel.native_type))
            }
        };
        statements.push(quote! {
            let __ret = match __ret {
                Ok(value) => value,
                Err(err) => return Err(#raise),
            };
        });
    }

    let values = &binding.return_shim.values;
    let tail = match values.len() {
        0 => quote! {
            let () = __ret;
            Ok(None)
        },
        1 => {
            let value = return_expr(&values[0], quote! { __ret })?;
            quote! { Ok(Some(#value)) }
        }
        _ => {
            let names: Vec<Ident> = (0..values.len())
                .map(|i| format_ident!("__ret{}", i))
                .collect();
            let converted = values
                .iter()
                .zip(&names)
                .map(|(conversion, name)| return_expr(conversion, quote! { #name }))
                .collect::<Result<Vec<_>, String>>()?;
            quote! {
                let (#(#names),*) = __ret;
                Ok(Some(runtime::Value::Array(vec![#(#converted),*])))
            }
        }
    };

    Ok(quote! {
        #[allow(non_snake_case, unused_variables)]
        pub fn #name(args: &[runtime::Value]) -> runtime::Result<Option<runtime::Value>> {
            #(#statements)*
            #tail
        }
    })
}

/// Shims and the `register` function for one unit, ordered by namespace then
/// function name.
pub fn generate_unit_shims(unit: &ScriptUnit) -> Result<TokenStream> {
    let mut distinct: BTreeMap<(&str, &str), &Binding> = BTreeMap::new();
    for binding in &unit.bindings {
        distinct.entry(binding.shim_key()).or_insert(binding);
    }

    let mut shims = Vec::new();
    let mut registrations = Vec::new();
    for binding in distinct.values() {
        let shim = generate_shim(binding).map_err(|message| CompileError::SanityCheck {
            unit: unit.file_name.clone(),
            location: binding.call_site.location,
            message,
        })?;
        shims.push(shim);

        let name = shim_ident(binding);
        let namespace = &binding.call_site.namespace;
        let function = &binding.call_site.called_name;
        registrations.push(quote! { registry.define(#namespace, #function, #name); });
    }

    Ok(quote! {
        #(#shims)*

        pub fn register(registry: &mut runtime::Registry) {
            #(#registrations)*
        }
    })
}

/// Rendered text of the unit's shims.
pub fn render_unit_shims(unit: &ScriptUnit) -> Result<String> {
    Ok(generate_unit_shims(unit)?.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declarations::{NativeFunctionSignature, NativePackage, NativeParameter};
    use crate::swizzle::bind;
    use crate::types::{NativeType, ReturnType};
    use crate::unit::SourceLocation;
    use crate::visitor::{ArgumentExpression, ArgumentKind, CallSite, Receivers};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn package() -> NativePackage {
        NativePackage {
            import_path: "net-tools::http".to_string(),
            directory: PathBuf::from("/pkgs/net-tools"),
            declarations: BTreeMap::new(),
            structs: BTreeMap::new(),
        }
    }

    fn site(name: &str) -> CallSite {
        CallSite {
            unit: "a.js".to_string(),
            namespace: "net".to_string(),
            called_name: name.to_string(),
            arguments: vec![ArgumentExpression {
                kind: ArgumentKind::String,
                text: "'x'".to_string(),
            }],
            receivers: Receivers::Single,
            location: SourceLocation { line: 1, column: 1 },
            enclosing_function: None,
        }
    }

    fn fetch() -> NativeFunctionSignature {
        NativeFunctionSignature {
            name: "Fetch".to_string(),
            parameter_types: vec![NativeParameter {
                name: "url".to_string(),
                ty: NativeType::Text { borrowed: true },
                rust: "& str".to_string(),
            }],
            return_types: vec![
                ReturnType {
                    ty: NativeType::Text { borrowed: false },
                    error_arm: false,
                },
                ReturnType {
                    ty: NativeType::Named {
                        name: "Error".into(),
                        path: "Error".into(),
                        borrowed: false,
                        mutable: false,
                    },
                    error_arm: true,
                },
            ],
            is_exported: true,
            is_async: false,
        }
    }

    #[test]
    fn test_shim_calls_through_crate_path_and_raises() {
        let binding = bind(&site("Fetch"), &package(), &fetch());
        let code = generate_shim(&binding).unwrap().to_string();
        assert!(code.contains("fn __net__Fetch"));
        assert!(code.contains(":: net_tools :: http :: Fetch (& __arg0)"));
        assert!(code.contains("runtime :: text (runtime :: arg (args , 0usize)) ?"));
        assert!(code.contains("runtime :: raise (& err)"));
        assert!(code.contains("runtime :: to_value (& __ret) ?"));
    }

    #[test]
    fn test_multiple_values_become_array() {
        let mut sig = fetch();
        sig.return_types.insert(
            1,
            ReturnType {
                ty: NativeType::Integer { name: "u16".into() },
                error_arm: false,
            },
        );
        let binding = bind(&site("Fetch"), &package(), &sig);
        let code = generate_shim(&binding).unwrap().to_string();
        assert!(code.contains("let (__ret0 , __ret1) = __ret ;"));
        assert!(code.contains("runtime :: Value :: Array (vec !"));
    }

    #[test]
    fn test_one_shim_per_function() {
        let mut unit = ScriptUnit::from_source(
            "a.js",
            PathBuf::from("/tmp/a.js"),
            "function Deploy() {}".to_string(),
        )
        .unwrap();
        let pkg = package();
        unit.bindings = vec![
            bind(&site("Fetch"), &pkg, &fetch()),
            bind(&site("Fetch"), &pkg, &fetch()),
        ];
        let code = render_unit_shims(&unit).unwrap();
        assert_eq!(code.matches("pub fn __net__Fetch").count(), 1);
        assert!(code.contains("registry . define (\"net\" , \"Fetch\" , __net__Fetch) ;"));
        assert_eq!(code, render_unit_shims(&unit).unwrap());
    }

    fn takes(params: Vec<(&str, NativeType)>) -> NativeFunctionSignature {
        NativeFunctionSignature {
            name: "Take".to_string(),
            parameter_types: params
                .into_iter()
                .map(|(name, ty)| NativeParameter {
                    name: name.to_string(),
                    rust: ty.to_string(),
                    ty,
                })
                .collect(),
            return_types: vec![],
            is_exported: true,
            is_async: false,
        }
    }

    fn borrowed_text() -> NativeType {
        NativeType::Text { borrowed: true }
    }

    fn slice_of(element: NativeType) -> NativeType {
        NativeType::Sequence {
            element: Box::new(element),
            borrowed: true,
        }
    }

    #[test]
    fn test_borrowed_elements_are_viewed_from_owned_storage() {
        let optional = takes(vec![(
            "name",
            NativeType::Optional {
                inner: Box::new(borrowed_text()),
            },
        )]);
        let code = generate_shim(&bind(&site("Take"), &package(), &optional))
            .unwrap()
            .to_string();
        assert!(code.contains("Some (runtime :: text (item) ?)"));
        assert!(code.contains("Take (__arg0 . as_ref () . map (| item | item . as_str ()))"));

        let variadic = takes(vec![("parts", slice_of(borrowed_text()))]);
        let code = generate_shim(&bind(&site("Take"), &package(), &variadic))
            .unwrap()
            .to_string();
        assert!(code.contains(
            "let __view0 : Vec < _ > = __arg0 . iter () . map (| item | item . as_str ()) . collect () ;"
        ));
        assert!(code.contains("Take (& __view0)"));

        let owned = takes(vec![
            (
                "xs",
                NativeType::Sequence {
                    element: Box::new(borrowed_text()),
                    borrowed: false,
                },
            ),
            ("n", NativeType::Integer { name: "u8".into() }),
        ]);
        let code = generate_shim(&bind(&site("Take"), &package(), &owned))
            .unwrap()
            .to_string();
        assert!(code.contains("Take (__view0 , __arg1)"));

        let session = NativeType::Named {
            name: "Session".into(),
            path: "client::Session".into(),
            borrowed: true,
            mutable: false,
        };
        let handle = takes(vec![(
            "session",
            NativeType::Optional {
                inner: Box::new(session),
            },
        )]);
        let code = generate_shim(&bind(&site("Take"), &package(), &handle))
            .unwrap()
            .to_string();
        assert!(code.contains("runtime :: handle ::"));
        assert!(code.contains("client :: Session"));
        assert!(code.contains("map (| item | :: std :: ops :: Deref :: deref (item))"));
    }

    #[test]
    fn test_single_array_feeds_numeric_variadic() {
        let sum = takes(vec![("xs", slice_of(NativeType::Integer { name: "u32".into() }))]);
        let code = generate_shim(&bind(&site("Take"), &package(), &sum))
            .unwrap()
            .to_string();
        assert!(code.contains("runtime :: rest_or_packed (args , 0usize)"));
        assert!(code.contains("Take (& __arg0)"));

        let merge = takes(vec![(
            "lists",
            slice_of(NativeType::Sequence {
                element: Box::new(NativeType::Integer { name: "u32".into() }),
                borrowed: false,
            }),
        )]);
        let code = generate_shim(&bind(&site("Take"), &package(), &merge))
            .unwrap()
            .to_string();
        assert!(code.contains("runtime :: rest (args , 0usize)"));
    }

    #[test]
    fn test_errors_without_display_raise_through_debug() {
        let mut sig = fetch();
        sig.return_types[1].ty = NativeType::Unit;
        let code = generate_shim(&bind(&site("Fetch"), &package(), &sig))
            .unwrap()
            .to_string();
        assert!(code.contains("Err (err) => return Err (runtime :: raise_debug (& err))"));
    }

    #[test]
    fn test_colliding_names_get_their_own_shims() {
        let mut unit = ScriptUnit::from_source(
            "a.js",
            PathBuf::from("/tmp/a.js"),
            "function Deploy() {}".to_string(),
        )
        .unwrap();
        let pkg = package();
        let mut first = site("b_c");
        first.namespace = "a".to_string();
        let mut second = site("c");
        second.namespace = "a_b".to_string();
        unit.bindings = vec![bind(&first, &pkg, &fetch()), bind(&second, &pkg, &fetch())];

        let code = render_unit_shims(&unit).unwrap();
        assert!(code.contains("registry . define (\"a\" , \"b_c\" , __a__b_uc) ;"));
        assert!(code.contains("registry . define (\"a_b\" , \"c\" , __a_ub__c) ;"));
        assert_eq!(code.matches("pub fn ").count(), 3);
    }
}
