//! Runtime support for the generated program.
//!
//! Native shims see script values as `serde_json::Value`. Values that serde
//! cannot carry are kept in a per-thread handle table and cross into the script
//! as `{"$handle": <id>}`.

use boa_engine::object::ObjectInitializer;
use boa_engine::property::Attribute;
use boa_engine::{Context, JsError, JsNativeError, JsString, JsValue, NativeFunction, Source};
use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

pub use serde_json::Value;

// ─── errors ───────────────────────────────────────────────────────────────────

/// A script-level exception raised from native code.
#[derive(Debug, Clone)]
pub struct Raised(pub String);

impl fmt::Display for Raised {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub type Result<T> = std::result::Result<T, Raised>;

pub fn raise(err: &dyn fmt::Display) -> Raised {
    Raised(err.to_string())
}

/// For error types without a `Display` impl.
pub fn raise_debug(err: &dyn fmt::Debug) -> Raised {
    Raised(format!("{:?}", err))
}

fn type_error(expected: &str, found: &Value) -> Raised {
    Raised(format!("expected {}, found {}", expected, found))
}

// ─── arguments ────────────────────────────────────────────────────────────────

static NULL: Value = Value::Null;

pub fn arg(args: &[Value], index: usize) -> &Value {
    args.get(index).unwrap_or(&NULL)
}

pub fn rest(args: &[Value], index: usize) -> &[Value] {
    args.get(index..).unwrap_or(&[])
}

/// Like [`rest`], but a single array argument stands for the whole tail.
pub fn rest_or_packed(args: &[Value], index: usize) -> &[Value] {
    match rest(args, index) {
        [Value::Array(items)] => items.as_slice(),
        tail => tail,
    }
}

pub fn number(value: &Value) -> Result<f64> {
    value.as_f64().ok_or_else(|| type_error("a number", value))
}

pub fn boolean(value: &Value) -> Result<bool> {
    value.as_bool().ok_or_else(|| type_error("a boolean", value))
}

pub fn text(value: &Value) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| type_error("a string", value))
}

pub fn character(value: &Value) -> Result<char> {
    let s = value.as_str().ok_or_else(|| type_error("a character", value))?;
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(type_error("a single character", value)),
    }
}

pub fn array(value: &Value) -> Result<&Vec<Value>> {
    value.as_array().ok_or_else(|| type_error("an array", value))
}

pub fn optional(value: &Value) -> Option<&Value> {
    if value.is_null() {
        None
    } else {
        Some(value)
    }
}

pub fn structural<T: serde::de::DeserializeOwned>(value: &Value) -> Result<T> {
    serde_json::from_value(value.clone()).map_err(|e| Raised(e.to_string()))
}

pub fn to_value<T: serde::Serialize + ?Sized>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| Raised(e.to_string()))
}

// ─── handles ──────────────────────────────────────────────────────────────────

thread_local! {
    static HANDLES: RefCell<Vec<Rc<dyn Any>>> = RefCell::new(Vec::new());
}

pub fn store<T: 'static>(value: T) -> Value {
    let id = HANDLES.with(|handles| {
        let mut handles = handles.borrow_mut();
        handles.push(Rc::new(value));
        handles.len() - 1
    });
    serde_json::json!({ "$handle": id })
}

pub fn handle<T: 'static>(value: &Value) -> Result<Rc<T>> {
    let id = value
        .get("$handle")
        .and_then(Value::as_u64)
        .ok_or_else(|| type_error("a native handle", value))? as usize;
    let any = HANDLES
        .with(|handles| handles.borrow().get(id).cloned())
        .ok_or_else(|| Raised(format!("unknown native handle {}", id)))?;
    any.downcast::<T>()
        .map_err(|_| Raised(format!("native handle {} has a different type", id)))
}

pub fn handle_owned<T: Clone + 'static>(value: &Value) -> Result<T> {
    Ok((*handle::<T>(value)?).clone())
}

// ─── registry ─────────────────────────────────────────────────────────────────

pub type Shim = fn(&[Value]) -> Result<Option<Value>>;

#[derive(Default)]
pub struct Registry {
    namespaces: BTreeMap<&'static str, Vec<(&'static str, Shim)>>,
}

impl Registry {
    pub fn define(&mut self, namespace: &'static str, name: &'static str, shim: Shim) {
        self.namespaces.entry(namespace).or_default().push((name, shim));
    }

    fn install(self, context: &mut Context) -> std::result::Result<(), JsError> {
        for (namespace, functions) in self.namespaces {
            let mut object = ObjectInitializer::new(context);
            for (name, shim) in functions {
                let function = NativeFunction::from_copy_closure(move |_this, args, context| {
                    let mut values = Vec::with_capacity(args.len());
                    for arg in args {
                        values.push(if arg.is_undefined() {
                            Value::Null
                        } else {
                            arg.to_json(context)?
                        });
                    }
                    match shim(&values) {
                        Ok(Some(value)) => JsValue::from_json(&value, context),
                        Ok(None) => Ok(JsValue::undefined()),
                        Err(raised) => Err(JsNativeError::error().with_message(raised.0).into()),
                    }
                });
                object.function(function, JsString::from(name), 0);
            }
            let object = object.build();
            context.register_global_property(JsString::from(namespace), object, Attribute::all())?;
        }
        Ok(())
    }
}

// ─── units ────────────────────────────────────────────────────────────────────

pub struct Unit {
    pub name: &'static str,
    pub preload: &'static str,
    pub source: &'static str,
    pub assets: &'static [(&'static str, &'static [u8])],
    pub timeout_secs: u64,
    pub entry_points: &'static [&'static str],
    pub register: fn(&mut Registry),
}

fn run_unit(unit: &Unit) -> std::result::Result<(), String> {
    let mut context = Context::default();
    let mut registry = Registry::default();
    (unit.register)(&mut registry);
    registry.install(&mut context).map_err(|e| e.to_string())?;

    // Bytes for every asset, text only for the ones that are valid UTF-8.
    let mut bytes = serde_json::Map::new();
    let mut texts = serde_json::Map::new();
    for (name, data) in unit.assets {
        bytes.insert(
            name.to_string(),
            Value::Array(data.iter().map(|b| Value::from(*b)).collect()),
        );
        if let Ok(text) = std::str::from_utf8(data) {
            texts.insert(name.to_string(), Value::String(text.to_string()));
        }
    }
    for (global, table) in [("__assets", bytes), ("__asset_texts", texts)] {
        let table = JsValue::from_json(&Value::Object(table), &mut context).map_err(|e| e.to_string())?;
        context
            .register_global_property(JsString::from(global), table, Attribute::all())
            .map_err(|e| e.to_string())?;
    }

    context
        .eval(Source::from_bytes(unit.preload))
        .map_err(|e| e.to_string())?;
    context
        .eval(Source::from_bytes(unit.source))
        .map_err(|e| e.to_string())?;

    for entry in unit.entry_points {
        let global = context.global_object();
        let function = global
            .get(JsString::from(*entry), &mut context)
            .map_err(|e| e.to_string())?;
        let callable = function
            .as_callable()
            .ok_or_else(|| format!("{} is not a function", entry))?;
        callable
            .call(&JsValue::undefined(), &[], &mut context)
            .map_err(|e| e.to_string())?;
    }
    Ok(())
}

/// Runs each group in order; units inside a group run concurrently. Returns
/// the process exit code.
pub fn run_groups(groups: &'static [(i64, &'static [Unit])]) -> i32 {
    let mut failed = false;
    for (priority, units) in groups {
        let (tx, rx) = mpsc::channel();
        for unit in units.iter() {
            let tx = tx.clone();
            thread::spawn(move || {
                let _ = tx.send((unit.name, run_unit(unit)));
            });
        }
        drop(tx);

        let limit = units.iter().map(|u| u.timeout_secs).max().unwrap_or(0);
        let deadline = Instant::now() + Duration::from_secs(limit);
        let mut finished = 0;
        while finished < units.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok((name, Ok(()))) => {
                    finished += 1;
                    eprintln!("[priority {}] {}: ok", priority, name);
                }
                Ok((name, Err(err))) => {
                    finished += 1;
                    failed = true;
                    eprintln!("[priority {}] {}: {}", priority, name, err);
                }
                Err(_) => {
                    eprintln!(
                        "[priority {}] {} unit(s) timed out",
                        priority,
                        units.len() - finished
                    );
                    return 124;
                }
            }
        }
    }
    i32::from(failed)
}
