// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Conversion of free-form JSON values into AMQP field values, used for
//! message headers and queue declaration arguments.

use lapin::types::{AMQPValue, FieldArray, FieldTable, LongString, ShortString};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Converts a JSON value into the closest AMQP field value.
pub fn amqp_value(value: &Value) -> AMQPValue {
    match value {
        Value::Null => AMQPValue::Void,
        Value::Bool(v) => AMQPValue::Boolean(*v),
        // AMQP has no unsigned 64-bit field, so integers past i64::MAX keep
        // their exact decimal form as a string
        Value::Number(n) => match (n.as_i64(), n.as_u64()) {
            (Some(v), _) => AMQPValue::LongLongInt(v),
            (None, Some(v)) => AMQPValue::LongString(LongString::from(v.to_string())),
            (None, None) => AMQPValue::Double(n.as_f64().unwrap_or_default()),
        },
        Value::String(v) => AMQPValue::LongString(LongString::from(v.as_str())),
        Value::Array(items) => {
            AMQPValue::FieldArray(FieldArray::from(items.iter().map(amqp_value).collect::<Vec<_>>()))
        }
        Value::Object(map) => {
            let mut btree = BTreeMap::<ShortString, AMQPValue>::default();
            for (key, value) in map {
                btree.insert(ShortString::from(key.as_str()), amqp_value(value));
            }
            AMQPValue::FieldTable(FieldTable::from(btree))
        }
    }
}

/// Inserts every entry of `map` into `btree`, overwriting existing keys.
pub fn extend_btree(map: &HashMap<String, Value>, btree: &mut BTreeMap<ShortString, AMQPValue>) {
    for (key, value) in map {
        btree.insert(ShortString::from(key.as_str()), amqp_value(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn converts_scalars() {
        assert_eq!(amqp_value(&json!(true)), AMQPValue::Boolean(true));
        assert_eq!(amqp_value(&json!(42)), AMQPValue::LongLongInt(42));
        assert_eq!(amqp_value(&json!(1.5)), AMQPValue::Double(1.5));
        assert_eq!(
            amqp_value(&json!("svc")),
            AMQPValue::LongString(LongString::from("svc"))
        );
        assert_eq!(amqp_value(&Value::Null), AMQPValue::Void);
    }

    #[test]
    fn keeps_large_unsigned_integers_exact() {
        assert_eq!(
            amqp_value(&json!(u64::MAX)),
            AMQPValue::LongString(LongString::from("18446744073709551615"))
        );
        assert_eq!(
            amqp_value(&json!(i64::MAX)),
            AMQPValue::LongLongInt(i64::MAX)
        );
    }

    #[test]
    fn converts_nested_objects() {
        let value = amqp_value(&json!({"retry": {"count": 3}}));
        let AMQPValue::FieldTable(table) = value else {
            panic!("expected a field table");
        };
        let inner = table.inner().get("retry").and_then(|v| v.as_field_table());
        assert_eq!(
            inner.and_then(|t| t.inner().get("count")).cloned(),
            Some(AMQPValue::LongLongInt(3))
        );
    }
}
