//! Fan-out/fan-in over a batch
//!
//! One logical operation over N inputs becomes N deferred requests sharing a
//! single aggregating completion. The caller's callback fires exactly once:
//! with the first error, or with all N results in input order.

use crate::api::Api;
use crate::args::{resolve, Arg, ArgType, Capability, EndpointFactory, ParamSpec};
use crate::error::{RestError, RestResult};
use crate::request::{Completion, Payload, Target};
use crate::transport::Method;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Argument shape of `auto_batch`
pub const AUTO_BATCH_SHAPE: &[ParamSpec] = &[
    ParamSpec::new("batch"),
    ParamSpec::new("endpoint").optional().capable(Capability::Endpoint),
    ParamSpec::new("named_endpoint").of_type(ArgType::String).mutex("endpoint"),
    ParamSpec::new("factory").of_type(ArgType::Function).mutex("endpoint"),
    ParamSpec::new("factory_args").capable(Capability::List).requires("factory"),
    ParamSpec::new("factory_arg").mutex("factory_args").requires("factory"),
    ParamSpec::new("count").optional().of_type(ArgType::Number),
    ParamSpec::new("method").of_type(ArgType::String),
    ParamSpec::new("data").optional().not_capable(Capability::List).not_type(ArgType::Function),
    ParamSpec::new("datas").capable(Capability::List).mutex("data"),
    ParamSpec::new("callback").of_type(ArgType::Function),
];

/// How each item's endpoint is found
enum Source {
    Fixed(Target),
    Factory {
        factory: EndpointFactory,
        inputs: Option<Vec<Value>>,
        fallback: Option<Value>,
    },
}

impl Source {
    fn target(&self, index: usize) -> RestResult<Target> {
        match self {
            Source::Fixed(target) => Ok(target.clone()),
            Source::Factory { factory, inputs, fallback } => {
                let input = inputs.as_ref()
                    .and_then(|inputs| inputs.get(index))
                    .or(fallback.as_ref());
                let endpoint = match input {
                    Some(Value::Array(spread)) => factory(spread)?,
                    Some(single) => factory(std::slice::from_ref(single))?,
                    None => factory(&[])?,
                };
                Ok(Target::Resolved(endpoint))
            }
        }
    }
}

/// Issue `count` requests and combine their outcomes into one callback.
///
/// Arguments follow `AUTO_BATCH_SHAPE`: a batch position (a batch, or
/// `Arg::Undefined` to let the combinator run its own), an endpoint given as
/// an `Endpoint`, a registry name, or a factory with its inputs, an optional
/// count, the method, one payload or a list of payloads, and the callback.
///
/// The count is the explicit count if given, else the number of payloads,
/// else the number of factory inputs. When none of these apply exactly one
/// request is made and its result is handed over as a scalar instead of a
/// one-element list. A count of zero completes at once with an empty list.
///
/// Errors in the argument list are returned; everything after that reaches
/// the callback, including a failing endpoint factory.
pub fn auto_batch(api: &Api, args: Vec<Arg<'_>>) -> RestResult<()> {
    let mut record = resolve(args, AUTO_BATCH_SHAPE)?;

    let batch = record.batch("batch")?;
    let method: Method = record.string("method")?
        .unwrap_or_default()
        .parse()?;
    let callback = record.callback("callback")?
        .ok_or_else(|| RestError::Argument("callback is required".to_string()))?;

    let source = if let Some(endpoint) = record.endpoint("endpoint")? {
        Source::Fixed(Target::Resolved(endpoint))
    } else if let Some(name) = record.string("named_endpoint")? {
        Source::Fixed(Target::Named(name))
    } else if let Some(factory) = record.factory("factory")? {
        Source::Factory {
            factory,
            inputs: record.list("factory_args")?,
            fallback: record.value("factory_arg")?,
        }
    } else {
        return Err(RestError::Argument("no endpoint, endpoint name, or endpoint factory given".to_string()));
    };

    let datas = record.list("datas")?;
    let data = record.payload("data")?;

    let (count, unwrap) = match (record.count("count")?, &datas, &source) {
        (Some(count), _, _) => (count, false),
        (None, Some(datas), _) => (datas.len(), false),
        (None, None, Source::Factory { inputs: Some(inputs), .. }) => (inputs.len(), false),
        _ => (1, true),
    };

    if count == 0 {
        callback(Ok(Value::Array(Vec::new())));
        return Ok(());
    }

    // Build every target before issuing anything, so a failing factory
    // leaves no half-issued fan-out behind
    let targets = match (0..count).map(|i| source.target(i)).collect::<RestResult<Vec<_>>>() {
        Ok(targets) => targets,
        Err(e) => {
            callback(Err(e));
            return Ok(());
        }
    };

    debug!("Auto-batching {} {} requests", count, method);

    let aggregate = Aggregate::new(count, unwrap, callback);
    let mut payload = data;
    let mut items = datas.map(Vec::into_iter);
    let mut own_batch = None;
    let batch = match batch {
        Some(batch) => batch,
        None => own_batch.insert(api.batch()),
    };

    for (index, target) in targets.into_iter().enumerate() {
        // Past the end of the payload list the last payload is reused
        if let Some(next) = items.as_mut().and_then(Iterator::next) {
            payload = Payload::from_value(next);
        }

        let aggregate = aggregate.clone();
        api.request(
            Some(&mut *batch),
            target,
            method,
            payload.clone(),
            Box::new(move |result| aggregate.settle(index, result)),
        );
    }

    if let Some(batch) = own_batch {
        tokio::spawn(batch.run_with_error_handler(move |e| aggregate.fail(e)));
    }

    Ok(())
}

struct AggregateState {
    slots: Vec<Option<Value>>,
    remaining: usize,
    unwrap: bool,
    callback: Option<Completion>,
}

/// Shared fan-in state. Results land in the slot of their input index, so
/// the delivered list is in input order whatever order they arrive in.
#[derive(Clone)]
struct Aggregate {
    state: Arc<Mutex<AggregateState>>,
}

impl Aggregate {
    fn new(count: usize, unwrap: bool, callback: Completion) -> Self {
        Self {
            state: Arc::new(Mutex::new(AggregateState {
                slots: vec![None; count],
                remaining: count,
                unwrap,
                callback: Some(callback),
            })),
        }
    }

    fn settle(&self, index: usize, result: RestResult<Value>) {
        match result {
            Ok(value) => self.succeed(index, value),
            Err(e) => self.fail(e),
        }
    }

    fn succeed(&self, index: usize, value: Value) {
        let finished = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.callback.is_none() {
                return;
            }
            match state.slots.get_mut(index) {
                Some(slot) if slot.is_none() => *slot = Some(value),
                _ => return,
            }
            state.remaining -= 1;
            if state.remaining > 0 {
                return;
            }

            let mut values: Vec<Value> = state.slots.iter_mut()
                .map(|slot| slot.take().unwrap_or(Value::Null))
                .collect();
            let combined = if state.unwrap {
                values.pop().unwrap_or(Value::Null)
            } else {
                Value::Array(values)
            };
            state.callback.take().map(|callback| (callback, combined))
        };

        if let Some((callback, combined)) = finished {
            callback(Ok(combined));
        }
    }

    /// First error wins; later outcomes are swallowed
    fn fail(&self, error: RestError) {
        let callback = self.state.lock().unwrap_or_else(|e| e.into_inner()).callback.take();
        if let Some(callback) = callback {
            callback(Err(error));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use crate::endpoint::Endpoint;
    use crate::request::Pending;
    use crate::test_support::connected;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn collect() -> (Completion, Pending<Value>) {
        let (completer, pending) = Pending::channel();
        (completer.completion(Ok), pending)
    }

    #[tokio::test]
    async fn test_single_item_unwraps() {
        let (api, transport) = connected().await;
        transport.push_json(201, json!({ "self": "http://h:7474/db/data/node/1" }));

        let (callback, pending) = collect();
        auto_batch(&api, args![Arg::Undefined, "node", "POST", json!({ "name": "a" }), callback]).unwrap();

        assert_eq!(pending.await.unwrap(), json!({ "self": "http://h:7474/db/data/node/1" }));
        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].endpoint.path(), "/db/data/node");
        assert_eq!(calls[1].method, Method::Post);
    }

    #[tokio::test]
    async fn test_list_makes_one_combined_call_in_input_order() {
        let (api, transport) = connected().await;
        // Server answers out of order; ids route the results
        transport.push_json(200, json!([
            { "id": 2, "status": 201, "body": { "n": "c" } },
            { "id": 0, "status": 201, "body": { "n": "a" } },
            { "id": 1, "status": 201, "body": { "n": "b" } },
        ]));

        let (callback, pending) = collect();
        let datas = vec![json!({ "n": "a" }), json!({ "n": "b" }), json!({ "n": "c" })];
        auto_batch(&api, args![Arg::Undefined, "node", "POST", datas, callback]).unwrap();

        assert_eq!(pending.await.unwrap(), json!([{ "n": "a" }, { "n": "b" }, { "n": "c" }]));

        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].endpoint.path(), "/db/data/batch");
        let jobs = transport.body(1);
        assert_eq!(jobs.as_array().unwrap().len(), 3);
        assert_eq!(jobs[1], json!({ "id": 1, "method": "POST", "to": "/node", "body": { "n": "b" } }));
    }

    #[tokio::test]
    async fn test_explicit_count_of_one_stays_a_list() {
        let (api, transport) = connected().await;
        transport.push_json(200, json!({ "x": 1 }));

        let (callback, pending) = collect();
        auto_batch(&api, args![Arg::Undefined, "node", 1, "GET", callback]).unwrap();
        assert_eq!(pending.await.unwrap(), json!([{ "x": 1 }]));
    }

    #[tokio::test]
    async fn test_count_replicates_fixed_payload() {
        let (api, transport) = connected().await;
        transport.push_json(200, json!([
            { "id": 0, "status": 201, "body": 1 },
            { "id": 1, "status": 201, "body": 2 },
        ]));

        let (callback, pending) = collect();
        auto_batch(&api, args![Arg::Undefined, "node", 2, "POST", json!({ "k": "v" }), callback]).unwrap();

        assert_eq!(pending.await.unwrap(), json!([1, 2]));
        let jobs = transport.body(1);
        assert_eq!(jobs[0]["body"], json!({ "k": "v" }));
        assert_eq!(jobs[1]["body"], json!({ "k": "v" }));
    }

    #[tokio::test]
    async fn test_zero_count_completes_without_network() {
        let (api, transport) = connected().await;

        let (callback, pending) = collect();
        auto_batch(&api, args![Arg::Undefined, "node", "POST", Vec::<Value>::new(), callback]).unwrap();

        assert_eq!(pending.await.unwrap(), json!([]));
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_factory_inputs_spread() {
        let (api, transport) = connected().await;
        transport.push_json(200, json!([
            { "id": 0, "status": 204 },
            { "id": 1, "status": 204 },
        ]));

        let factory: EndpointFactory = Arc::new(|inputs: &[Value]| {
            let id = inputs.first().and_then(Value::as_u64).unwrap_or_default();
            let kind = inputs.get(1).and_then(Value::as_str).unwrap_or("node");
            Endpoint::parse(&format!("http://h:7474/db/data/{}/{}", kind, id))
        });

        let (callback, pending) = collect();
        let inputs = vec![json!([4, "node"]), json!([9, "relationship"])];
        auto_batch(&api, args![Arg::Undefined, factory, inputs, "DELETE", callback]).unwrap();

        assert_eq!(pending.await.unwrap(), json!([null, null]));
        let jobs = transport.body(1);
        assert_eq!(jobs[0]["to"], "/node/4");
        assert_eq!(jobs[1]["to"], "/relationship/9");
        assert!(jobs[0].get("body").is_none());
    }

    #[tokio::test]
    async fn test_factory_error_reaches_callback() {
        let (api, transport) = connected().await;
        let factory: EndpointFactory = Arc::new(|_: &[Value]| Err(RestError::Argument("bad id".to_string())));

        let (callback, pending) = collect();
        auto_batch(&api, args![Arg::Undefined, factory, json!(1), "GET", callback]).unwrap();

        assert!(matches!(pending.await, Err(RestError::Argument(_))));
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_caller_batch_is_not_run() {
        let (api, transport) = connected().await;
        let mut batch = api.batch();

        let (callback, pending) = collect();
        auto_batch(&api, args![&mut batch, "node", "POST", vec![json!({}), json!({})], callback]).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(transport.calls().len(), 1);

        transport.push_json(200, json!([
            { "id": 0, "status": 201, "body": "a" },
            { "id": 1, "status": 201, "body": "b" },
        ]));
        batch.run().await;
        assert_eq!(pending.await.unwrap(), json!(["a", "b"]));
    }

    #[tokio::test]
    async fn test_first_error_short_circuits_once() {
        let (api, transport) = connected().await;
        let mut batch = api.batch();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        let (completer, pending) = Pending::<Value>::channel();
        let callback: Completion = Box::new(move |result| {
            counter.fetch_add(1, Ordering::SeqCst);
            completer.complete(result);
        });
        auto_batch(&api, args![&mut batch, "node", "POST", vec![json!(1), json!(2), json!(3)], callback]).unwrap();

        transport.push_json(200, json!([
            { "id": 0, "status": 201, "body": {} },
            { "id": 1, "status": 201, "body": {} },
            { "id": 2, "status": 404, "body": { "message": "gone" } },
        ]));
        // Without a handler the batch failure reaches all three requests
        batch.run().await;

        assert_eq!(pending.await.unwrap_err().status(), Some(404));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_own_batch_failure_goes_to_callback() {
        let (api, transport) = connected().await;
        transport.push_error(RestError::Transport("reset".to_string()));

        let (callback, pending) = collect();
        auto_batch(&api, args![Arg::Undefined, "node", "POST", vec![json!(1), json!(2)], callback]).unwrap();

        assert!(matches!(pending.await, Err(RestError::Transport(_))));
    }

    #[tokio::test]
    async fn test_missing_method_is_rejected() {
        let (api, transport) = connected().await;
        let callback: Completion = Box::new(|_| {});

        let err = auto_batch(&api, args![Arg::Undefined, "node", callback]).unwrap_err();
        assert!(matches!(err, RestError::Argument(_)));
        assert_eq!(transport.calls().len(), 1);
    }

    #[test]
    fn test_aggregate_orders_by_index() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let aggregate = Aggregate::new(3, false, Box::new(move |result| sink.lock().unwrap().push(result)));

        aggregate.settle(2, Ok(json!("c")));
        aggregate.settle(0, Ok(json!("a")));
        assert!(seen.lock().unwrap().is_empty());
        aggregate.settle(1, Ok(json!("b")));
        // Late outcomes are ignored
        aggregate.settle(1, Err(RestError::Abandoned));
        aggregate.fail(RestError::Abandoned);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].as_ref().unwrap(), &json!(["a", "b", "c"]));
    }

    #[test]
    fn test_aggregate_unwraps_single() {
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        let aggregate = Aggregate::new(1, true, Box::new(move |result| *sink.lock().unwrap() = Some(result)));

        aggregate.settle(0, Ok(json!({ "id": 1 })));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.as_ref().unwrap().as_ref().unwrap(), &json!({ "id": 1 }));
    }
}
