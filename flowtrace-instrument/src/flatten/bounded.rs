//! A [`serde::Serializer`] producing [`serde_json::Value`] that stops
//! descending after a fixed nesting depth.
//!
//! `serde_json::to_value` recurses until the stack overflows on a
//! self-referential structure (an `Rc<RefCell<Node>>` whose `next` points
//! back at itself, for instance). Here any compound value found at
//! `max_depth` is replaced with [`DEPTH_MARKER`].

use serde::ser::{self, Serialize};
use serde_json::{Map, Value};
use std::fmt;

pub const DEPTH_MARKER: &str = "[max depth exceeded]";

#[derive(Debug)]
pub struct Error(String);

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Error {}

impl ser::Error for Error {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Error(msg.to_string())
    }
}

/// Serialize `value`, cutting off compound values nested `max_depth` levels
/// below the root.
pub fn to_value<T>(value: &T, max_depth: usize) -> Result<Value, Error>
where
    T: ?Sized + Serialize,
{
    value.serialize(Serializer {
        depth: 0,
        max_depth,
    })
}

#[derive(Clone, Copy)]
struct Serializer {
    depth: usize,
    max_depth: usize,
}

impl Serializer {
    fn child(self) -> Self {
        Self {
            depth: self.depth + 1,
            ..self
        }
    }

    fn exhausted(self) -> bool {
        self.depth >= self.max_depth
    }

    fn seq(self, len: Option<usize>) -> SeqCollector {
        SeqCollector {
            ser: self,
            items: Vec::with_capacity(len.unwrap_or(0).min(64)),
        }
    }

    fn map(self) -> MapCollector {
        MapCollector {
            ser: self,
            map: Map::new(),
            next_key: None,
        }
    }
}

fn marker() -> Value {
    Value::String(DEPTH_MARKER.to_string())
}

fn key_string(key: Value) -> String {
    match key {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

impl ser::Serializer for Serializer {
    type Ok = Value;
    type Error = Error;
    type SerializeSeq = SeqCollector;
    type SerializeTuple = SeqCollector;
    type SerializeTupleStruct = SeqCollector;
    type SerializeTupleVariant = VariantSeqCollector;
    type SerializeMap = MapCollector;
    type SerializeStruct = MapCollector;
    type SerializeStructVariant = VariantMapCollector;

    fn serialize_bool(self, v: bool) -> Result<Value, Error> {
        Ok(Value::Bool(v))
    }

    fn serialize_i8(self, v: i8) -> Result<Value, Error> {
        Ok(Value::from(v))
    }

    fn serialize_i16(self, v: i16) -> Result<Value, Error> {
        Ok(Value::from(v))
    }

    fn serialize_i32(self, v: i32) -> Result<Value, Error> {
        Ok(Value::from(v))
    }

    fn serialize_i64(self, v: i64) -> Result<Value, Error> {
        Ok(Value::from(v))
    }

    fn serialize_i128(self, v: i128) -> Result<Value, Error> {
        Ok(i64::try_from(v)
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(v.to_string())))
    }

    fn serialize_u8(self, v: u8) -> Result<Value, Error> {
        Ok(Value::from(v))
    }

    fn serialize_u16(self, v: u16) -> Result<Value, Error> {
        Ok(Value::from(v))
    }

    fn serialize_u32(self, v: u32) -> Result<Value, Error> {
        Ok(Value::from(v))
    }

    fn serialize_u64(self, v: u64) -> Result<Value, Error> {
        Ok(Value::from(v))
    }

    fn serialize_u128(self, v: u128) -> Result<Value, Error> {
        Ok(u64::try_from(v)
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(v.to_string())))
    }

    fn serialize_f32(self, v: f32) -> Result<Value, Error> {
        Ok(Value::from(f64::from(v)))
    }

    fn serialize_f64(self, v: f64) -> Result<Value, Error> {
        Ok(Value::from(v))
    }

    fn serialize_char(self, v: char) -> Result<Value, Error> {
        Ok(Value::String(v.to_string()))
    }

    fn serialize_str(self, v: &str) -> Result<Value, Error> {
        Ok(Value::String(v.to_string()))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Value, Error> {
        Ok(Value::Array(v.iter().map(|b| Value::from(*b)).collect()))
    }

    fn serialize_none(self) -> Result<Value, Error> {
        Ok(Value::Null)
    }

    fn serialize_some<T>(self, value: &T) -> Result<Value, Error>
    where
        T: ?Sized + Serialize,
    {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Value, Error> {
        Ok(Value::Null)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Value, Error> {
        Ok(Value::Null)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<Value, Error> {
        Ok(Value::String(variant.to_string()))
    }

    fn serialize_newtype_struct<T>(self, _name: &'static str, value: &T) -> Result<Value, Error>
    where
        T: ?Sized + Serialize,
    {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T>(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<Value, Error>
    where
        T: ?Sized + Serialize,
    {
        if self.exhausted() {
            return Ok(marker());
        }
        let mut map = Map::new();
        map.insert(variant.to_string(), value.serialize(self.child())?);
        Ok(Value::Object(map))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<SeqCollector, Error> {
        Ok(self.seq(len))
    }

    fn serialize_tuple(self, len: usize) -> Result<SeqCollector, Error> {
        Ok(self.seq(Some(len)))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<SeqCollector, Error> {
        Ok(self.seq(Some(len)))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<VariantSeqCollector, Error> {
        Ok(VariantSeqCollector {
            variant,
            inner: self.seq(Some(len)),
        })
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<MapCollector, Error> {
        Ok(self.map())
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<MapCollector, Error> {
        Ok(self.map())
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<VariantMapCollector, Error> {
        Ok(VariantMapCollector {
            variant,
            inner: self.map(),
        })
    }
}

// ============================================================================
// Compound collectors
// ============================================================================

struct SeqCollector {
    ser: Serializer,
    items: Vec<Value>,
}

impl SeqCollector {
    fn push<T>(&mut self, value: &T) -> Result<(), Error>
    where
        T: ?Sized + Serialize,
    {
        if !self.ser.exhausted() {
            self.items.push(value.serialize(self.ser.child())?);
        }
        Ok(())
    }

    fn finish(self) -> Value {
        if self.ser.exhausted() {
            marker()
        } else {
            Value::Array(self.items)
        }
    }
}

impl ser::SerializeSeq for SeqCollector {
    type Ok = Value;
    type Error = Error;

    fn serialize_element<T>(&mut self, value: &T) -> Result<(), Error>
    where
        T: ?Sized + Serialize,
    {
        self.push(value)
    }

    fn end(self) -> Result<Value, Error> {
        Ok(self.finish())
    }
}

impl ser::SerializeTuple for SeqCollector {
    type Ok = Value;
    type Error = Error;

    fn serialize_element<T>(&mut self, value: &T) -> Result<(), Error>
    where
        T: ?Sized + Serialize,
    {
        self.push(value)
    }

    fn end(self) -> Result<Value, Error> {
        Ok(self.finish())
    }
}

impl ser::SerializeTupleStruct for SeqCollector {
    type Ok = Value;
    type Error = Error;

    fn serialize_field<T>(&mut self, value: &T) -> Result<(), Error>
    where
        T: ?Sized + Serialize,
    {
        self.push(value)
    }

    fn end(self) -> Result<Value, Error> {
        Ok(self.finish())
    }
}

struct VariantSeqCollector {
    variant: &'static str,
    inner: SeqCollector,
}

impl ser::SerializeTupleVariant for VariantSeqCollector {
    type Ok = Value;
    type Error = Error;

    fn serialize_field<T>(&mut self, value: &T) -> Result<(), Error>
    where
        T: ?Sized + Serialize,
    {
        self.inner.push(value)
    }

    fn end(self) -> Result<Value, Error> {
        let mut map = Map::new();
        map.insert(self.variant.to_string(), self.inner.finish());
        Ok(Value::Object(map))
    }
}

struct MapCollector {
    ser: Serializer,
    map: Map<String, Value>,
    next_key: Option<String>,
}

impl MapCollector {
    fn insert<T>(&mut self, key: String, value: &T) -> Result<(), Error>
    where
        T: ?Sized + Serialize,
    {
        if !self.ser.exhausted() {
            self.map.insert(key, value.serialize(self.ser.child())?);
        }
        Ok(())
    }

    fn finish(self) -> Value {
        if self.ser.exhausted() {
            marker()
        } else {
            Value::Object(self.map)
        }
    }
}

impl ser::SerializeMap for MapCollector {
    type Ok = Value;
    type Error = Error;

    fn serialize_key<T>(&mut self, key: &T) -> Result<(), Error>
    where
        T: ?Sized + Serialize,
    {
        if !self.ser.exhausted() {
            self.next_key = Some(key_string(key.serialize(self.ser.child())?));
        }
        Ok(())
    }

    fn serialize_value<T>(&mut self, value: &T) -> Result<(), Error>
    where
        T: ?Sized + Serialize,
    {
        if self.ser.exhausted() {
            return Ok(());
        }
        let key = self
            .next_key
            .take()
            .ok_or_else(|| <Error as ser::Error>::custom("map value without a key"))?;
        self.insert(key, value)
    }

    fn end(self) -> Result<Value, Error> {
        Ok(self.finish())
    }
}

impl ser::SerializeStruct for MapCollector {
    type Ok = Value;
    type Error = Error;

    fn serialize_field<T>(&mut self, key: &'static str, value: &T) -> Result<(), Error>
    where
        T: ?Sized + Serialize,
    {
        self.insert(key.to_string(), value)
    }

    fn end(self) -> Result<Value, Error> {
        Ok(self.finish())
    }
}

struct VariantMapCollector {
    variant: &'static str,
    inner: MapCollector,
}

impl ser::SerializeStructVariant for VariantMapCollector {
    type Ok = Value;
    type Error = Error;

    fn serialize_field<T>(&mut self, key: &'static str, value: &T) -> Result<(), Error>
    where
        T: ?Sized + Serialize,
    {
        self.inner.insert(key.to_string(), value)
    }

    fn end(self) -> Result<Value, Error> {
        let mut map = Map::new();
        map.insert(self.variant.to_string(), self.inner.finish());
        Ok(Value::Object(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::ser::SerializeStruct;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(serde::Serialize)]
    enum Shape {
        Circle(f64),
        Rect { w: u32, h: u32 },
        Empty,
    }

    #[test]
    fn test_matches_serde_json_within_depth() {
        let value = json!({"a": {"b": [1, 2, {"c": null}]}, "d": "text", "e": 1.5});
        assert_eq!(to_value(&value, 10).unwrap(), value);
    }

    #[test]
    fn test_enum_representations() {
        assert_eq!(to_value(&Shape::Circle(1.0), 5).unwrap(), json!({"Circle": 1.0}));
        assert_eq!(
            to_value(&Shape::Rect { w: 2, h: 3 }, 5).unwrap(),
            json!({"Rect": {"w": 2, "h": 3}})
        );
        assert_eq!(to_value(&Shape::Empty, 5).unwrap(), json!("Empty"));
    }

    #[test]
    fn test_depth_limit_replaces_compound_values() {
        let value = json!({"l1": {"l2": {"l3": 1}}, "top": 0});
        assert_eq!(
            to_value(&value, 2).unwrap(),
            json!({"l1": {"l2": DEPTH_MARKER}, "top": 0})
        );
    }

    struct Node {
        name: String,
        next: Option<Rc<RefCell<Node>>>,
    }

    impl Serialize for Node {
        fn serialize<S: ser::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            let mut s = serializer.serialize_struct("Node", 2)?;
            s.serialize_field("name", &self.name)?;
            s.serialize_field("next", &self.next.as_ref().map(|n| NodeRef(n.clone())))?;
            s.end()
        }
    }

    struct NodeRef(Rc<RefCell<Node>>);

    impl Serialize for NodeRef {
        fn serialize<S: ser::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            self.0.borrow().serialize(serializer)
        }
    }

    #[test]
    fn test_self_referential_value_terminates() {
        let node = Rc::new(RefCell::new(Node {
            name: "loop".to_string(),
            next: None,
        }));
        node.borrow_mut().next = Some(node.clone());

        let value = to_value(&NodeRef(node.clone()), 3).unwrap();
        assert_eq!(
            value,
            json!({"name": "loop", "next": {"name": "loop", "next": {"name": "loop", "next": DEPTH_MARKER}}})
        );

        node.borrow_mut().next = None;
    }

    #[test]
    fn test_custom_error_propagates() {
        struct Failing;
        impl Serialize for Failing {
            fn serialize<S: ser::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
                Err(<S::Error as ser::Error>::custom("cannot serialize"))
            }
        }
        let err = to_value(&Failing, 5).unwrap_err();
        assert_eq!(err.to_string(), "cannot serialize");
    }
}
