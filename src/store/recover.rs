use log::warn;
use serde_json::Value;

/// Outcome of a tolerant decode.
///
/// `had_extra_data` is set whenever the raw bytes held more than one
/// top-level value or carried a discarded unreadable tail. The caller uses it
/// to opportunistically rewrite the document in canonical single-value form.
#[derive(Debug, Clone, PartialEq)]
pub struct Recovered {
    pub value: Value,
    pub had_extra_data: bool,
}

/// Decodes raw bytes that may contain several concatenated top-level JSON
/// values, the telltale artifact of writers racing without a lock.
///
/// Values are parsed one after another and merged left to right:
/// array+array extends, array+object appends the object, object+object
/// updates (later keys win). Any other adjacent pairing halts the merge and
/// the remaining bytes are discarded as an unreadable tail.
///
/// Returns `None` when not a single value could be parsed; the caller then
/// enters corruption handling.
pub fn decode(raw: &[u8]) -> Option<Recovered> {
    let mut stream = serde_json::Deserializer::from_slice(raw).into_iter::<Value>();

    let mut acc: Option<Value> = None;
    let mut parsed = 0usize;
    let mut discarded_tail = false;

    loop {
        let value = match stream.next() {
            Some(Ok(v)) => v,
            Some(Err(e)) => {
                if parsed == 0 {
                    return None;
                }
                warn!(
                    "discarding unreadable tail after {} parsed value(s): {}",
                    parsed, e
                );
                discarded_tail = true;
                break;
            }
            None => break,
        };
        parsed += 1;

        match acc.take() {
            None => acc = Some(value),
            Some(prev) => match merge(prev, value) {
                Ok(merged) => acc = Some(merged),
                Err(prev) => {
                    warn!("halting merge at value {}: incompatible adjacent types", parsed);
                    discarded_tail = true;
                    acc = Some(prev);
                    break;
                }
            },
        }
    }

    acc.map(|value| Recovered {
        value,
        had_extra_data: parsed > 1 || discarded_tail,
    })
}

/// Merges two adjacent top-level values, or hands back the accumulator
/// unchanged when the pairing is not mergeable.
fn merge(acc: Value, next: Value) -> std::result::Result<Value, Value> {
    match (acc, next) {
        (Value::Array(mut a), Value::Array(b)) => {
            a.extend(b);
            Ok(Value::Array(a))
        }
        (Value::Array(mut a), Value::Object(o)) => {
            a.push(Value::Object(o));
            Ok(Value::Array(a))
        }
        (Value::Object(mut a), Value::Object(b)) => {
            for (k, v) in b {
                a.insert(k, v);
            }
            Ok(Value::Object(a))
        }
        (acc, _) => Err(acc),
    }
}
