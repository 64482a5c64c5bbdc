use std::sync::Arc;

use log_pipeline::{
    logger, Attr, Chain, Context, ContextData, HandlerOptions, JsonHandler, Level, Logger,
    SharedBuffer, TextHandler,
};
use serde_json::json;

fn json_logger(buffer: &SharedBuffer) -> Logger {
    Chain::new(JsonHandler::new(
        buffer.clone(),
        HandlerOptions::default().with_level(Level::DEBUG),
    ))
    .context_data("ctx")
    .into_logger()
}

fn records(buffer: &SharedBuffer) -> Vec<serde_json::Value> {
    let bytes = buffer.contents();
    serde_json::Deserializer::from_slice(&bytes)
        .into_iter::<serde_json::Value>()
        .map(|record| {
            let mut record = record.expect("invalid JSON line");
            if let Some(object) = record.as_object_mut() {
                object.remove("time");
            }
            record
        })
        .collect()
}

#[test]
fn context_data_follows_the_logger_nesting() {
    let buffer = SharedBuffer::new();
    let ctx = Context::new().with_data(ContextData::new("req-1").with("tenant", "acme"));

    json_logger(&buffer)
        .with_group("project")
        .info(&ctx, "created", vec![Attr::string("name", "demo")]);

    assert_eq!(
        records(&buffer),
        vec![json!({
            "level": "INFO",
            "msg": "created",
            "project": {
                "ctx": {"id": "req-1", "tenant": "acme"},
                "name": "demo",
            },
        })]
    );
}

#[test]
fn child_contexts_extend_without_touching_the_parent() {
    let buffer = SharedBuffer::new();
    let logger = json_logger(&buffer);
    let parent = Context::new().with_data(ContextData::new("req-1").with("step", "parse"));
    let child = parent.with_data(ContextData::from_iter([("step", "store"), ("table", "users")]));

    logger.debug(&child, "child", Vec::new());
    logger.debug(&parent, "parent", Vec::new());
    logger.debug(&Context::new(), "bare", Vec::new());

    assert_eq!(
        records(&buffer),
        vec![
            json!({
                "level": "DEBUG",
                "msg": "child",
                "ctx": {"id": "req-1", "step": "store", "table": "users"},
            }),
            json!({"level": "DEBUG", "msg": "parent", "ctx": {"id": "req-1", "step": "parse"}}),
            json!({"level": "DEBUG", "msg": "bare"}),
        ]
    );
}

#[test]
fn sibling_loggers_do_not_see_each_other() {
    let buffer = SharedBuffer::new();
    let base = json_logger(&buffer).with(vec![Attr::string("app", "api")]);
    let first = base.with_group("a").with(vec![Attr::int("x", 1)]);
    let second = base.with_group("b").with(vec![Attr::int("y", 2)]);
    let ctx = Context::new();

    first.info(&ctx, "first", Vec::new());
    second.info(&ctx, "second", Vec::new());
    base.info(&ctx, "base", Vec::new());

    assert_eq!(
        records(&buffer),
        vec![
            json!({"level": "INFO", "msg": "first", "app": "api", "a": {"x": 1}}),
            json!({"level": "INFO", "msg": "second", "app": "api", "b": {"y": 2}}),
            json!({"level": "INFO", "msg": "base", "app": "api"}),
        ]
    );
}

#[test]
fn context_logger_is_preferred_over_the_default() {
    let buffer = SharedBuffer::new();
    let ctx = Context::new()
        .with_data(ContextData::new("req-9"))
        .with_logger(json_logger(&buffer).with(vec![Attr::string("scope", "request")]));

    logger::from_context(&ctx).warn(&ctx, "slow", Vec::new());

    assert_eq!(
        records(&buffer),
        vec![json!({
            "level": "WARN",
            "msg": "slow",
            "scope": "request",
            "ctx": {"id": "req-9"},
        })]
    );
}

#[test]
fn text_output_inlines_context_data_with_an_empty_group() {
    let buffer = SharedBuffer::new();
    let options = HandlerOptions::default().with_replace_attr(Arc::new(
        |groups: &[String], attr: Attr| (!(groups.is_empty() && attr.key() == "time")).then_some(attr),
    ));
    let logger = Chain::new(TextHandler::new(buffer.clone(), options))
        .context_data("")
        .into_logger();

    logger.info(
        &Context::new().with_data(ContextData::new("req-1")),
        "handled",
        vec![Attr::int("status", 200)],
    );

    let bytes = buffer.contents();
    assert_eq!(
        String::from_utf8(bytes).expect("output is not UTF-8"),
        "level=INFO msg=handled id=req-1 status=200\n"
    );
}
