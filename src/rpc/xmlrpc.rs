// XML-RPC encoding and decoding for the supervisor control interface

use crate::error::{MemmonError, Result};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::BTreeMap;

/// An XML-RPC value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    String(String),
    Double(f64),
    Nil,
    Array(Vec<Value>),
    Struct(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(values) => Some(values),
            _ => None,
        }
    }

    /// Member of a struct value
    pub fn get(&self, member: &str) -> Option<&Value> {
        match self {
            Value::Struct(members) => members.get(member),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

/// Serialize a method call document
pub fn encode_call(method: &str, params: &[Value]) -> String {
    let mut out = String::from("<?xml version=\"1.0\"?>\n<methodCall>");
    out.push_str("<methodName>");
    out.push_str(&quick_xml::escape::escape(method));
    out.push_str("</methodName><params>");
    for param in params {
        out.push_str("<param>");
        encode_value(&mut out, param);
        out.push_str("</param>");
    }
    out.push_str("</params></methodCall>\n");
    out
}

fn encode_value(out: &mut String, value: &Value) {
    out.push_str("<value>");
    match value {
        Value::Int(i) => out.push_str(&format!("<int>{}</int>", i)),
        Value::Bool(b) => out.push_str(&format!("<boolean>{}</boolean>", u8::from(*b))),
        Value::String(s) => {
            out.push_str("<string>");
            out.push_str(&quick_xml::escape::escape(s.as_str()));
            out.push_str("</string>");
        }
        Value::Double(d) => out.push_str(&format!("<double>{}</double>", d)),
        Value::Nil => out.push_str("<nil/>"),
        Value::Array(values) => {
            out.push_str("<array><data>");
            for value in values {
                encode_value(out, value);
            }
            out.push_str("</data></array>");
        }
        Value::Struct(members) => {
            out.push_str("<struct>");
            for (name, value) in members {
                out.push_str("<member><name>");
                out.push_str(&quick_xml::escape::escape(name.as_str()));
                out.push_str("</name>");
                encode_value(out, value);
                out.push_str("</member>");
            }
            out.push_str("</struct>");
        }
    }
    out.push_str("</value>");
}

/// Decode a `methodResponse` document
///
/// A `fault` response is returned as [`MemmonError::RpcFault`].
pub fn decode_response(xml: &str) -> Result<Value> {
    let document = Element::parse(xml)?;
    let response = document
        .child("methodResponse")
        .ok_or_else(|| malformed("missing methodResponse"))?;

    if let Some(fault) = response.child("fault") {
        let value = decode_value(fault.child("value").ok_or_else(|| malformed("empty fault"))?)?;
        let code = value.get("faultCode").and_then(Value::as_i64).unwrap_or(0);
        let message = value
            .get("faultString")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Err(MemmonError::RpcFault { code, message });
    }

    let value = response
        .child("params")
        .and_then(|params| params.child("param"))
        .and_then(|param| param.child("value"))
        .ok_or_else(|| malformed("missing response value"))?;

    decode_value(value)
}

fn decode_value(element: &Element) -> Result<Value> {
    // A value without a type element is a string
    let Some(typed) = element.children.first() else {
        return Ok(Value::String(element.text.clone()));
    };

    match typed.name.as_str() {
        "int" | "i4" | "i8" => typed
            .text
            .trim()
            .parse()
            .map(Value::Int)
            .map_err(|_| malformed(&format!("bad integer {:?}", typed.text))),
        "boolean" => match typed.text.trim() {
            "1" => Ok(Value::Bool(true)),
            "0" => Ok(Value::Bool(false)),
            other => Err(malformed(&format!("bad boolean {:?}", other))),
        },
        "double" => typed
            .text
            .trim()
            .parse()
            .map(Value::Double)
            .map_err(|_| malformed(&format!("bad double {:?}", typed.text))),
        "string" | "dateTime.iso8601" | "base64" => Ok(Value::String(typed.text.clone())),
        "nil" => Ok(Value::Nil),
        "array" => {
            let data = typed.child("data").ok_or_else(|| malformed("array without data"))?;
            data.children_named("value")
                .map(decode_value)
                .collect::<Result<Vec<_>>>()
                .map(Value::Array)
        }
        "struct" => {
            let mut members = BTreeMap::new();
            for member in typed.children_named("member") {
                let name = member.child("name").ok_or_else(|| malformed("member without name"))?;
                let value = member.child("value").ok_or_else(|| malformed("member without value"))?;
                members.insert(name.text.clone(), decode_value(value)?);
            }
            Ok(Value::Struct(members))
        }
        other => Err(malformed(&format!("unknown value type {}", other))),
    }
}

fn malformed(reason: &str) -> MemmonError {
    MemmonError::XmlRpcError(reason.to_string())
}

/// Minimal element tree used while decoding
#[derive(Debug, Default)]
struct Element {
    name: String,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn named(name: &[u8]) -> Self {
        Self {
            name: String::from_utf8_lossy(name).into_owned(),
            ..Default::default()
        }
    }

    /// Parse a document into a synthetic root holding the top-level element
    fn parse(xml: &str) -> Result<Element> {
        let mut reader = Reader::from_str(xml);
        let mut stack = vec![Element::default()];

        loop {
            let event = reader.read_event().map_err(|e| {
                malformed(&format!("invalid XML at {}: {}", reader.buffer_position(), e))
            })?;

            match event {
                Event::Start(start) => stack.push(Element::named(start.name().as_ref())),
                Event::Empty(empty) => {
                    let element = Element::named(empty.name().as_ref());
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(element);
                    }
                }
                Event::End(_) => {
                    let element = stack.pop().ok_or_else(|| malformed("unbalanced tags"))?;
                    let parent = stack.last_mut().ok_or_else(|| malformed("unbalanced tags"))?;
                    parent.children.push(element);
                }
                Event::Text(text) => {
                    let text = text
                        .unescape()
                        .map_err(|e| malformed(&format!("bad text: {}", e)))?;
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&text);
                    }
                }
                Event::CData(data) => {
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&String::from_utf8_lossy(&data));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        match stack.pop() {
            Some(root) if stack.is_empty() => Ok(root),
            _ => Err(malformed("unexpected end of document")),
        }
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|child| child.name == name)
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |child| child.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(value: &str) -> String {
        format!(
            "<?xml version='1.0'?>\n<methodResponse>\n<params>\n<param>\n{}\n\
             </param>\n</params>\n</methodResponse>\n",
            value
        )
    }

    #[test]
    fn test_encode_call() {
        let xml = encode_call("supervisor.stopProcess", &["g:a&b".into(), true.into()]);
        assert_eq!(
            xml,
            "<?xml version=\"1.0\"?>\n<methodCall><methodName>supervisor.stopProcess</methodName>\
             <params><param><value><string>g:a&amp;b</string></value></param>\
             <param><value><boolean>1</boolean></value></param></params></methodCall>\n"
        );
    }

    #[test]
    fn test_encode_call_without_params() {
        let xml = encode_call("supervisor.getAllProcessInfo", &[]);
        assert!(xml.contains(
            "<methodName>supervisor.getAllProcessInfo</methodName><params></params>"
        ));
    }

    #[test]
    fn test_decode_scalars() {
        assert_eq!(
            decode_response(&response("<value><int>42</int></value>")).unwrap(),
            Value::Int(42)
        );
        assert_eq!(
            decode_response(&response("<value><i4>-7</i4></value>")).unwrap(),
            Value::Int(-7)
        );
        assert_eq!(
            decode_response(&response("<value><boolean>1</boolean></value>")).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            decode_response(&response("<value><string>a &lt;b&gt;</string></value>")).unwrap(),
            Value::String("a <b>".to_string())
        );
        assert_eq!(
            decode_response(&response("<value>bare</value>")).unwrap(),
            Value::String("bare".to_string())
        );
        assert_eq!(
            decode_response(&response("<value><nil/></value>")).unwrap(),
            Value::Nil
        );
    }

    #[test]
    fn test_decode_array_of_structs() {
        let xml = response(
            "<value><array><data>
               <value><struct>
                 <member><name>name</name><value><string>web</string></value></member>
                 <member><name>group</name><value><string>frontend</string></value></member>
                 <member><name>pid</name><value><int>1234</int></value></member>
               </struct></value>
               <value><struct>
                 <member><name>name</name><value><string>idle</string></value></member>
                 <member><name>pid</name><value><int>0</int></value></member>
               </struct></value>
             </data></array></value>",
        );

        let value = decode_response(&xml).unwrap();
        let records = value.as_array().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("name").and_then(Value::as_str), Some("web"));
        assert_eq!(records[0].get("group").and_then(Value::as_str), Some("frontend"));
        assert_eq!(records[0].get("pid").and_then(Value::as_i64), Some(1234));
        assert_eq!(records[1].get("group"), None);
    }

    #[test]
    fn test_decode_fault() {
        let xml = "<?xml version='1.0'?>
            <methodResponse><fault><value><struct>
              <member><name>faultCode</name><value><int>70</int></value></member>
              <member>
                <name>faultString</name>
                <value><string>NOT_RUNNING: g:foo</string></value>
              </member>
            </struct></value></fault></methodResponse>";

        match decode_response(xml) {
            Err(MemmonError::RpcFault { code, message }) => {
                assert_eq!(code, 70);
                assert_eq!(message, "NOT_RUNNING: g:foo");
            }
            other => panic!("Expected fault, got: {:?}", other),
        }
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(
            decode_response("<methodResponse><params>"),
            Err(MemmonError::XmlRpcError(_))
        ));
        assert!(matches!(
            decode_response("<html>nope</html>"),
            Err(MemmonError::XmlRpcError(_))
        ));
        assert!(matches!(
            decode_response(&response("<value><int>x</int></value>")),
            Err(MemmonError::XmlRpcError(_))
        ));
    }
}
