//! Generic XML → JSON conversion for feeds, plus dot-path lookup.
//!
//! Feeds are not deserialized into fixed structs: every source names the
//! path of its item list (`rss.channel.item`, `feed.entry`, …) and the
//! fields it wants, so the document is first turned into a
//! [`serde_json::Value`] with these rules:
//!
//! - an element becomes an object keyed by its qualified name
//! - repeated child names collapse into an array
//! - attributes become string properties of the element object
//! - an element with neither attributes nor children becomes its text
//! - otherwise its text, if any, is stored under `$t`
//! - CDATA sections count as text

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde_json::{Map, Value};

/// Key under which element text is stored when the element also has
/// attributes or children.
pub const TEXT_KEY: &str = "$t";

struct Frame {
    name: String,
    map: Map<String, Value>,
    text: String,
}

impl Frame {
    fn root() -> Self {
        Self {
            name: String::new(),
            map: Map::new(),
            text: String::new(),
        }
    }

    fn open(start: &BytesStart<'_>) -> Result<Self, String> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut map = Map::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| format!("bad attribute on <{name}>: {e}"))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| format!("bad attribute value on <{name}>: {e}"))?
                .into_owned();
            map.insert(key, Value::String(value));
        }
        Ok(Self {
            name,
            map,
            text: String::new(),
        })
    }

    fn finish(self) -> (String, Value) {
        let Frame {
            name,
            mut map,
            text,
        } = self;
        if map.is_empty() {
            return (name, Value::String(text));
        }
        if !text.is_empty() {
            map.insert(TEXT_KEY.to_string(), Value::String(text));
        }
        (name, Value::Object(map))
    }
}

fn attach(parent: &mut Frame, name: String, value: Value) {
    match parent.map.remove(&name) {
        None => {
            parent.map.insert(name, value);
        }
        Some(Value::Array(mut items)) => {
            items.push(value);
            parent.map.insert(name, Value::Array(items));
        }
        Some(existing) => {
            parent.map.insert(name, Value::Array(vec![existing, value]));
        }
    }
}

/// Decode text that may carry HTML-only entities (`&nbsp;`, `&mdash;`, …)
/// which strict XML unescaping rejects.
fn lenient_unescape(raw: &[u8]) -> String {
    let raw = String::from_utf8_lossy(raw);
    match quick_xml::escape::unescape(&raw) {
        Ok(text) => text.into_owned(),
        Err(_) => html_escape::decode_html_entities(&raw).into_owned(),
    }
}

/// Convert an XML document into a JSON value following the module rules.
pub fn xml_to_value(xml: &str) -> Result<Value, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack = vec![Frame::root()];
    loop {
        let event = reader
            .read_event()
            .map_err(|e| format!("at byte {}: {e}", reader.buffer_position()))?;
        match event {
            Event::Start(start) => stack.push(Frame::open(&start)?),
            Event::Empty(start) => {
                let (name, value) = Frame::open(&start)?.finish();
                if let Some(parent) = stack.last_mut() {
                    attach(parent, name, value);
                }
            }
            Event::End(_) => {
                if stack.len() < 2 {
                    return Err("closing tag without an open element".to_string());
                }
                if let Some(frame) = stack.pop() {
                    let (name, value) = frame.finish();
                    if let Some(parent) = stack.last_mut() {
                        attach(parent, name, value);
                    }
                }
            }
            Event::Text(text) => {
                let text = lenient_unescape(&text);
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&text);
                }
            }
            Event::CData(cdata) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&String::from_utf8_lossy(&cdata));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if stack.len() != 1 {
        return Err(format!("{} element(s) left unclosed", stack.len() - 1));
    }
    let root = stack.pop().map(|f| f.map).unwrap_or_default();
    if root.is_empty() {
        return Err("document has no root element".to_string());
    }
    Ok(Value::Object(root))
}

/// Walk a dot-separated path (`rss.channel.item`) and return the list found
/// there. A single object at the end of the path counts as a one-element
/// list; an empty path addresses the value itself.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<Vec<&'a Value>> {
    let mut current = value;
    for key in path.split('.').filter(|k| !k.is_empty()) {
        current = current.get(key)?;
    }
    match current {
        Value::Array(items) => Some(items.iter().collect()),
        Value::Object(_) => Some(vec![current]),
        _ => None,
    }
}

/// Text of a field value: strings as-is, element objects via their `$t`,
/// numbers and booleans printed.
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get(TEXT_KEY).and_then(value_text),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
