//! Script execution inside one Boa context

use boa_engine::{
    property::PropertyKey, Context, JsNativeError, JsResult, JsString, JsValue, NativeFunction,
    Source,
};
use serde_json::Value as JsonValue;

use crate::bridge::current_bridge;
use crate::JsExecutionError;

/// Loop-iteration ceiling; a second line of defense under the wall-clock
/// timeout, which cannot interrupt the interpreter mid-loop.
const LOOP_ITERATION_LIMIT: u64 = 50_000_000;

const RECURSION_LIMIT: usize = 512;

/// Run one script to completion on the current (blocking) thread.
///
/// The script sees `input` as a global and may call
/// `callTool(server, tool, args)`. The result is the script's completion
/// value, or the return value of a `main(input)` function when the script
/// defines one instead.
pub fn execute_script(code: &str, input: &JsonValue) -> Result<JsonValue, JsExecutionError> {
    let mut context = Context::default();
    context
        .runtime_limits_mut()
        .set_loop_iteration_limit(LOOP_ITERATION_LIMIT);
    context.runtime_limits_mut().set_recursion_limit(RECURSION_LIMIT);

    register_call_tool(&mut context)
        .map_err(|e| JsExecutionError::RuntimeError(format!("failed to register callTool: {}", e)))?;

    let console = boa_runtime::Console::init(&mut context);
    context
        .register_global_property(
            JsString::from("console"),
            console,
            boa_engine::property::Attribute::all(),
        )
        .map_err(|e| JsExecutionError::RuntimeError(format!("failed to register console: {}", e)))?;

    let input_value = json_to_js(&mut context, input)
        .map_err(|e| JsExecutionError::InputError(e.to_string()))?;
    context
        .global_object()
        .set(
            PropertyKey::from(JsString::from("input")),
            input_value.clone(),
            true,
            &mut context,
        )
        .map_err(|e| JsExecutionError::InputError(e.to_string()))?;

    let completion = context
        .eval(Source::from_bytes(code))
        .map_err(|e| JsExecutionError::RuntimeError(e.to_string()))?;

    // Expression scripts are done; program scripts expose main(input)
    let result = if completion.is_undefined() || completion.is_null() {
        let main = context
            .global_object()
            .get(PropertyKey::from(JsString::from("main")), &mut context)
            .map_err(|e| JsExecutionError::RuntimeError(e.to_string()))?;

        match main.as_callable() {
            Some(function) => function
                .call(&JsValue::undefined(), &[input_value], &mut context)
                .map_err(|e| JsExecutionError::RuntimeError(e.to_string()))?,
            None => completion,
        }
    } else if let Some(function) = completion.as_callable() {
        function
            .call(&JsValue::undefined(), &[input_value], &mut context)
            .map_err(|e| JsExecutionError::RuntimeError(e.to_string()))?
    } else {
        completion
    };

    js_to_json(&mut context, result)
}

/// The `callTool(server, tool, args)` host function
fn call_tool_native(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let server = string_arg(args, 0, "server", context)?;
    let tool = string_arg(args, 1, "tool", context)?;

    let call_args = match args.get(2) {
        Some(value) if !value.is_null() && !value.is_undefined() => {
            js_value_to_json(context, value.clone()).map_err(|e| {
                JsNativeError::error()
                    .with_message(format!("args must be JSON-serializable: {}", e))
            })?
        }
        _ => JsonValue::Object(serde_json::Map::new()),
    };

    let bridge = current_bridge().ok_or_else(|| {
        JsNativeError::error().with_message("callTool is unavailable outside an execution")
    })?;

    let result = bridge
        .call(&server, &tool, call_args)
        .map_err(|message| JsNativeError::error().with_message(message))?;

    json_to_js(context, &result)
}

fn register_call_tool(context: &mut Context) -> JsResult<()> {
    context.register_global_callable(
        JsString::from("callTool"),
        3,
        NativeFunction::from_fn_ptr(call_tool_native),
    )
}

fn string_arg(args: &[JsValue], index: usize, name: &str, context: &mut Context) -> JsResult<String> {
    let value = args.get(index).ok_or_else(|| {
        JsNativeError::error().with_message(format!("{} parameter is required", name))
    })?;
    if !value.is_string() {
        return Err(JsNativeError::error()
            .with_message(format!("{} must be a string", name))
            .into());
    }
    Ok(value.to_string(context)?.to_std_string_escaped())
}

/// Build a JS value from JSON by evaluating JSON.parse over the escaped text
fn json_to_js(context: &mut Context, value: &JsonValue) -> JsResult<JsValue> {
    let text = serde_json::to_string(value).map_err(|e| {
        boa_engine::JsError::from(JsNativeError::error().with_message(e.to_string()))
    })?;
    let escaped = text.replace('\\', "\\\\").replace('\'', "\\'");
    context.eval(Source::from_bytes(&format!("JSON.parse('{}')", escaped)))
}

/// Convert a JS value to JSON through JSON.stringify on a scratch global
fn js_value_to_json(context: &mut Context, value: JsValue) -> Result<JsonValue, JsExecutionError> {
    if value.is_undefined() || value.is_null() {
        return Ok(JsonValue::Null);
    }

    context
        .global_object()
        .set(
            PropertyKey::from(JsString::from("__scratch")),
            value,
            true,
            context,
        )
        .map_err(|e| JsExecutionError::OutputError(e.to_string()))?;

    let text = context
        .eval(Source::from_bytes("JSON.stringify(__scratch)"))
        .map_err(|e| JsExecutionError::OutputError(e.to_string()))?;

    if text.is_undefined() {
        // stringify(undefined) and stringify(function) yield undefined
        return Ok(JsonValue::Null);
    }

    let text = text
        .to_string(context)
        .map_err(|e| JsExecutionError::OutputError(e.to_string()))?
        .to_std_string_escaped();

    serde_json::from_str(&text).map_err(|e| JsExecutionError::OutputError(e.to_string()))
}

fn js_to_json(context: &mut Context, value: JsValue) -> Result<JsonValue, JsExecutionError> {
    js_value_to_json(context, value)
}
