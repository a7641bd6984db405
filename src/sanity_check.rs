//! Sanity checks for generated bindings.
//!
//! Runs after swizzling and before any code reaches the native compiler. A
//! binding that gets past this point must produce a shim that agrees with its
//! call-site: right argument count, no unresolved conversions, a return shim
//! covering every native result, and literal arguments of a compatible kind.

use crate::error::{CompileError, Result};
use crate::swizzle::{Binding, Conversion, ErrorFormat};
use crate::unit::ScriptUnit;
use crate::visitor::{ArgumentExpression, ArgumentKind, Receivers};

/// Checks every binding of a unit and reports the first violation.
pub fn sanity_check_unit(unit: &ScriptUnit) -> Result<()> {
    for binding in &unit.bindings {
        check_binding(binding).map_err(|message| CompileError::SanityCheck {
            unit: unit.file_name.clone(),
            location: binding.call_site.location,
            message: format!(
                "{}.{}: {}",
                binding.call_site.namespace, binding.call_site.called_name, message
            ),
        })?;
    }
    Ok(())
}

/// Returns a human-readable reason when the binding is inconsistent.
pub fn check_binding(binding: &Binding) -> Result<(), String> {
    let signature = &binding.signature;
    let arity = signature.arity();

    if signature.is_async {
        return Err("async native functions cannot be bridged".to_string());
    }

    if binding.argument_shims.len() != arity {
        return Err(format!(
            "generated {} argument shim(s) for {} parameter(s)",
            binding.argument_shims.len(),
            arity
        ));
    }

    for shim in &binding.argument_shims {
        if let Some((type_name, reason)) = shim.conversion.unresolved() {
            return Err(format!(
                "parameter '{}' of type {} has no conversion ({})",
                shim.parameter, type_name, reason
            ));
        }
    }

    check_arguments(binding)?;

    let returns = &binding.return_shim;
    if returns.arity() != signature.return_types.len() {
        return Err(format!(
            "return shim covers {} value(s) but the function returns {}",
            returns.arity(),
            signature.return_types.len()
        ));
    }
    for conversion in &returns.values {
        if let Some((type_name, reason)) = conversion.unresolved() {
            return Err(format!(
                "return type {} has no conversion ({})",
                type_name, reason
            ));
        }
    }

    if let Some(channel) = &returns.error {
        if channel.format == ErrorFormat::Unformattable {
            return Err(format!(
                "error type {} implements neither Display nor Debug",
                channel.native_type
            ));
        }
    }

    check_receivers(binding)
}

fn is_variadic(binding: &Binding) -> bool {
    matches!(
        binding.argument_shims.last().map(|s| &s.conversion),
        Some(Conversion::Variadic { .. })
    )
}

fn check_arguments(binding: &Binding) -> Result<(), String> {
    let arguments = &binding.call_site.arguments;
    let arity = binding.signature.arity();
    let variadic = is_variadic(binding);
    let fixed = if variadic { arity - 1 } else { arity };

    if let Some(position) = arguments
        .iter()
        .position(|a| a.kind == ArgumentKind::Spread)
    {
        if !variadic || position < fixed {
            return Err(format!(
                "spread argument at position {} does not feed a variadic parameter",
                position + 1
            ));
        }
    }

    let count_ok = if variadic {
        arguments.len() >= fixed
    } else {
        arguments.len() == arity
    };
    if !count_ok {
        return Err(format!(
            "called with {} argument(s), expected {}{}",
            arguments.len(),
            if variadic { "at least " } else { "" },
            fixed
        ));
    }

    // A lone array literal in the variadic position carries the whole tail.
    let packed = variadic
        && arguments.len() == arity
        && arguments[fixed].kind == ArgumentKind::Array
        && binding.argument_shims[fixed].conversion.packs_array();

    for (i, argument) in arguments.iter().enumerate() {
        if packed && i == fixed {
            continue;
        }
        let shim = &binding.argument_shims[i.min(arity.saturating_sub(1))];
        let conversion = match &shim.conversion {
            Conversion::Variadic { element } if i >= fixed => &**element,
            other => other,
        };
        if !accepts(conversion, argument) {
            return Err(format!(
                "argument {} ({}) is a {:?} literal but parameter '{}' expects {}",
                i + 1,
                argument.text,
                argument.kind,
                shim.parameter,
                shim.native_type
            ));
        }
    }

    Ok(())
}

/// Whether a literal of the argument's kind can feed the conversion. Dynamic
/// expressions are only checked at runtime.
fn accepts(conversion: &Conversion, argument: &ArgumentExpression) -> bool {
    match argument.kind {
        ArgumentKind::Dynamic | ArgumentKind::Spread => return true,
        _ => {}
    }
    match conversion {
        Conversion::Numeric { .. } => argument.kind == ArgumentKind::Number,
        Conversion::Boolean => argument.kind == ArgumentKind::Boolean,
        Conversion::Text { single_char, .. } => {
            argument.kind == ArgumentKind::String && (!single_char || is_single_char(argument))
        }
        Conversion::Structural {
            type_name, named, ..
        } => {
            (!named && type_name == "serde_json::Value" && argument.kind != ArgumentKind::Function)
                || matches!(argument.kind, ArgumentKind::Object | ArgumentKind::Array)
        }
        Conversion::Collection { .. } => argument.kind == ArgumentKind::Array,
        Conversion::Variadic { element } => accepts(element, argument),
        Conversion::Optional { inner } => {
            argument.kind == ArgumentKind::Null || accepts(inner, argument)
        }
        Conversion::Handle { .. } | Conversion::Unresolved { .. } => false,
    }
}

fn is_single_char(argument: &ArgumentExpression) -> bool {
    let text = argument.text.trim();
    let quoted = text.len() >= 2
        && (text.starts_with('"') || text.starts_with('\''))
        && text.ends_with(&text[..1]);
    if !quoted {
        return true;
    }
    text[1..text.len() - 1].chars().count() == 1
}

fn check_receivers(binding: &Binding) -> Result<(), String> {
    let delivered = binding.return_shim.delivered();
    match binding.call_site.receivers {
        Receivers::None => Ok(()),
        Receivers::Single if delivered == 0 => {
            Err("result is assigned but the function delivers no value".to_string())
        }
        Receivers::Single => Ok(()),
        Receivers::Destructured(n) if delivered > 1 => {
            if n > delivered {
                Err(format!(
                    "destructures {} value(s) but the function delivers {}",
                    n, delivered
                ))
            } else {
                Ok(())
            }
        }
        // A single array-like value can still be destructured by the script.
        Receivers::Destructured(n) => match binding.return_shim.values.first() {
            Some(Conversion::Collection { .. } | Conversion::Structural { .. }) => Ok(()),
            _ => Err(format!(
                "destructures {} value(s) but the function delivers {}",
                n, delivered
            )),
        },
    }
}
