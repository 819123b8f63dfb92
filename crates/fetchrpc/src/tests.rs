use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use fetchpack::Decoder;
use fetchpack::Encoder;
use fetchpack::Pack;

use crate::*;

// ============================================================================
//  HELPERS
// ============================================================================

fn ctx() -> CallContext {
    CallContext::new(ConnectionHandle(7), Address::from("10.0.0.1:9000"))
}

fn invoke_with(c: &dyn Callable, ctx: &CallContext, args: &[u8]) -> std::result::Result<Vec<u8>, ServiceError> {
    let mut dec = Decoder::new(args);
    let mut out = Encoder::new();
    c.invoke(ctx, &mut out, &mut dec)?;
    Ok(out.into_bytes())
}

fn packed<T: Pack + ?Sized>(value: &T) -> Vec<u8> {
    let mut enc = Encoder::new();
    enc.pack(value).unwrap();
    enc.into_bytes()
}

#[derive(Default)]
struct RecordingSink {
    frames: Mutex<Vec<Vec<u8>>>,
    refuse: bool,
}

impl RecordingSink {
    fn refusing() -> Self {
        Self { frames: Mutex::new(Vec::new()), refuse: true }
    }

    fn envelopes(&self) -> Vec<Envelope> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .map(|f| Envelope::decode(&f[HEADER_SIZE..]).unwrap())
            .collect()
    }
}

impl FrameSink for RecordingSink {
    fn deliver(&self, frame: Vec<u8>) -> std::result::Result<(), ServiceError> {
        if self.refuse {
            return Err(ServiceError::new(ErrorCode::CouldNotDeliver, "sink closed"));
        }
        self.frames.lock().unwrap().push(frame);
        Ok(())
    }
}

struct Counter {
    base: u32,
}

impl Counter {
    fn add(&self, x: u32) -> u32 {
        self.base + x
    }

    fn whoami(&self, ctx: &CallContext, offset: u64) -> u64 {
        ctx.handle.0 + offset + self.base as u64
    }
}

// ============================================================================
//  FRAMES
// ============================================================================

#[test]
fn test_header_layout() {
    let header = FrameHeader::new(5);
    assert_eq!(
        header.encode(),
        [0xFE, 0x7C, 0x80, 0xA1, 0xFE, 0x7C, 0x80, 0xA1, 0, 0, 0, 0, 0, 0, 0, 5]
    );
    assert_eq!(FrameHeader::decode(&header.encode()), header);
    assert_eq!(header.validate(DEFAULT_MAX_FRAME_SIZE), Ok(5));
}

#[test]
fn test_header_rejects_bad_magic_and_oversize() {
    let bad = FrameHeader { magic: 0xDEAD_BEEF, length: 1 };
    assert_eq!(bad.validate(DEFAULT_MAX_FRAME_SIZE), Err(Error::BadMagic(0xDEAD_BEEF)));

    let big = FrameHeader::new(1025);
    assert_eq!(big.validate(1024), Err(Error::FrameTooLarge { length: 1025, max: 1024 }));
}

#[test]
fn test_to_frame_prefixes_header() {
    let frame = to_frame(&[9, 9]);
    assert_eq!(frame.len(), HEADER_SIZE + 2);
    assert_eq!(&frame[8..16], &2u64.to_be_bytes());
    assert_eq!(&frame[16..], &[9, 9]);
}

#[test]
fn test_call_envelope_layout() {
    let call = Envelope::Call { protocol: 2, function: 3, counter: 4, args: vec![0xAA] };
    assert_eq!(
        call.to_bytes().unwrap(),
        vec![1, 0, 2, 0, 3, 0, 0, 0, 0, 0, 0, 0, 4, 0xAA]
    );
}

#[test]
fn test_every_envelope_survives_the_wire() {
    let envelopes = vec![
        Envelope::Call { protocol: 1, function: 2, counter: u64::MAX, args: packed(&(1u32, "x")) },
        Envelope::Reply { counter: 42, value: vec![0] },
        Envelope::Error { counter: 43, error: ServiceError::member_not_found(9) },
        Envelope::Subscribe { protocol: 1, feed: 5, subscription: 77 },
        Envelope::Unsubscribe { protocol: 1, feed: 5, subscription: 77 },
        Envelope::Feed { protocol: 1, feed: 5, subscription: 77, payload: packed("tick") },
    ];

    for envelope in envelopes {
        let frame = envelope.to_frame().unwrap();
        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(&frame[..HEADER_SIZE]);
        let len = FrameHeader::decode(&header).validate(DEFAULT_MAX_FRAME_SIZE).unwrap();
        assert_eq!(len, frame.len() - HEADER_SIZE);
        assert_eq!(Envelope::decode(&frame[HEADER_SIZE..]).unwrap(), envelope);
    }
}

#[test]
fn test_unknown_kind_and_truncation() {
    assert_eq!(Envelope::decode(&[0x7F]), Err(Error::UnknownKind(0x7F)));
    assert!(matches!(Envelope::decode(&[1, 0, 2]), Err(Error::Codec(_))));
    assert!(matches!(Envelope::decode(&[]), Err(Error::Codec(_))));
}

#[test]
fn test_unknown_error_code_is_preserved_as_unknown() {
    let mut enc = Encoder::new();
    enc.u8(Kind::Error as u8);
    enc.u64(1);
    enc.u16(999);
    enc.str("mystery").unwrap();

    let Envelope::Error { error, .. } = Envelope::decode(enc.as_bytes()).unwrap() else {
        panic!("expected an error envelope");
    };
    assert_eq!(error.code, ErrorCode::Unknown);
    assert_eq!(error.message, "mystery");
}

// ============================================================================
//  CALLABLES
// ============================================================================

#[test]
fn test_function_unrolls_arguments_in_order() {
    let sub = Function::new(|a: u32, b: u32| a - b);
    let out = invoke_with(&sub, &ctx(), &packed(&(10u32, 3u32))).unwrap();
    assert_eq!(out, 7u32.to_be_bytes());
}

#[test]
fn test_zero_argument_function() {
    let answer = Function::new(|| String::from("forty-two"));
    let out = invoke_with(&answer, &ctx(), &[]).unwrap();
    assert_eq!(out, packed("forty-two"));
}

#[test]
fn test_void_return_writes_sentinel() {
    let seen = Arc::new(AtomicU64::new(0));
    let sink = seen.clone();
    let store = Function::new(move |v: u64| sink.store(v, Ordering::SeqCst));

    let out = invoke_with(&store, &ctx(), &packed(&11u64)).unwrap();
    assert_eq!(out, vec![0]);
    assert_eq!(seen.load(Ordering::SeqCst), 11);
}

#[test]
fn test_leftover_arguments_are_bad_arguments() {
    let id = Function::new(|a: u8| a);
    let err = invoke_with(&id, &ctx(), &[1, 2]).unwrap_err();
    assert_eq!(err.code, ErrorCode::BadArguments);
}

#[test]
fn test_missing_arguments_are_serialization_errors() {
    let add = Function::new(|a: u32, b: u32| a + b);
    let err = invoke_with(&add, &ctx(), &packed(&1u32)).unwrap_err();
    assert_eq!(err.code, ErrorCode::Serialization);
}

#[test]
fn test_application_error_becomes_error_reply() {
    let div = Function::new(|a: u32, b: u32| -> std::result::Result<u32, ServiceError> {
        if b == 0 {
            return Err(ServiceError::application("division by zero"));
        }
        Ok(a / b)
    });

    assert_eq!(invoke_with(&div, &ctx(), &packed(&(9u32, 3u32))).unwrap(), 3u32.to_be_bytes());

    let err = invoke_with(&div, &ctx(), &packed(&(9u32, 0u32))).unwrap_err();
    assert_eq!(err.code, ErrorCode::Application);
    assert_eq!(err.message, "division by zero");
}

#[test]
fn test_context_is_injected_before_arguments() {
    let whoami = Function::with_context(|ctx: &CallContext, suffix: String| {
        format!("{}{}", ctx.peer, suffix)
    });
    let out = invoke_with(&whoami, &ctx(), &packed("!")).unwrap();
    assert_eq!(out, packed("10.0.0.1:9000!"));
}

#[test]
fn test_class_members() {
    let counter = Arc::new(Counter { base: 10 });

    let add = ClassMember::new(counter.clone(), Counter::add);
    assert_eq!(invoke_with(&add, &ctx(), &packed(&5u32)).unwrap(), 15u32.to_be_bytes());

    let whoami = ClassMember::with_context(counter, Counter::whoami);
    assert_eq!(invoke_with(&whoami, &ctx(), &packed(&100u64)).unwrap(), 117u64.to_be_bytes());
}

#[test]
fn test_packed_wrapper_for_custom_types() {
    struct Point(i32, i32);
    impl Pack for Point {
        fn pack(&self, enc: &mut Encoder) -> fetchpack::Result<()> {
            enc.i32(self.0);
            enc.i32(self.1);
            Ok(())
        }
    }

    let origin = Function::new(|| Packed(Point(-1, 2)));
    let out = invoke_with(&origin, &ctx(), &[]).unwrap();
    assert_eq!(out, packed(&(-1i32, 2i32)));
}

// ============================================================================
//  PROTOCOL
// ============================================================================

#[test]
fn test_function_ids_are_unique() {
    let mut proto = Protocol::new();
    proto.expose_fn(1, |a: u32| a).unwrap();

    let err = proto.expose_fn(1, || 0u8).unwrap_err();
    assert_eq!(err.code, ErrorCode::MemberExists);

    // The original registration is untouched.
    let out = invoke_with(proto.get(1).unwrap(), &ctx(), &packed(&3u32)).unwrap();
    assert_eq!(out, 3u32.to_be_bytes());
    assert_eq!(proto.len(), 1);
}

#[test]
fn test_lookup_of_unknown_function() {
    let proto = Protocol::new();
    assert!(proto.is_empty());
    let err = proto.get(9).err().unwrap();
    assert_eq!(err.code, ErrorCode::MemberNotFound);
}

#[test]
fn test_feed_ids_are_unique() {
    let mut proto = Protocol::new();
    proto.register_feed(1, Arc::new(FeedPublisher::new())).unwrap();

    let err = proto.register_feed(1, Arc::new(FeedPublisher::new())).unwrap_err();
    assert_eq!(err.code, ErrorCode::FeedExists);
    assert_eq!(proto.feed(2).err().unwrap().code, ErrorCode::FeedNotFound);
    assert_eq!(proto.feed_ids(), vec![1]);
}

#[test]
fn test_all_exposure_helpers() {
    let counter = Arc::new(Counter { base: 1 });
    let mut proto = Protocol::new();
    proto.expose_fn(4, |a: u8, b: u8| a as u16 + b as u16).unwrap();
    proto.expose_with_context(3, |ctx: &CallContext| ctx.handle.0).unwrap();
    proto.expose_member(2, counter.clone(), Counter::add).unwrap();
    proto.expose_member_with_context(1, counter, Counter::whoami).unwrap();
    assert_eq!(proto.function_ids(), vec![1, 2, 3, 4]);

    let out = invoke_with(proto.get(3).unwrap(), &ctx(), &[]).unwrap();
    assert_eq!(out, 7u64.to_be_bytes());
}

#[test]
fn test_connection_dropped_clears_subscriptions_and_runs_hook() {
    let publisher = Arc::new(FeedPublisher::new());
    let sink = Arc::new(RecordingSink::default());
    let dropped = Arc::new(Mutex::new(Vec::new()));

    let mut proto = Protocol::new();
    proto.register_feed(1, publisher.clone()).unwrap();
    let log = dropped.clone();
    proto.on_connection_dropped(move |h| log.lock().unwrap().push(h));

    for (handle, subscription) in [(1, 10), (1, 11), (2, 20)] {
        publisher.subscribe(Subscriber {
            handle: ConnectionHandle(handle),
            protocol: 5,
            feed: 1,
            subscription,
            sink: sink.clone(),
        });
    }

    proto.connection_dropped(ConnectionHandle(1));
    assert_eq!(publisher.subscriber_count(), 1);
    assert_eq!(*dropped.lock().unwrap(), vec![ConnectionHandle(1)]);
}

// ============================================================================
//  FEEDS
// ============================================================================

#[test]
fn test_publish_fans_out_with_subscription_ids() {
    let publisher = FeedPublisher::new();
    let sink = Arc::new(RecordingSink::default());

    for subscription in [100, 200] {
        publisher.subscribe(Subscriber {
            handle: ConnectionHandle(1),
            protocol: 3,
            feed: 4,
            subscription,
            sink: sink.clone(),
        });
    }

    assert_eq!(publisher.publish(&String::from("block")), 2);

    let subs: Vec<u64> = sink
        .envelopes()
        .into_iter()
        .map(|e| match e {
            Envelope::Feed { protocol: 3, feed: 4, subscription, payload } => {
                assert_eq!(payload, packed("block"));
                subscription
            }
            other => panic!("unexpected envelope {:?}", other),
        })
        .collect();
    assert_eq!(subs, vec![100, 200]);
}

#[test]
fn test_refusing_sink_is_dropped() {
    let publisher = FeedPublisher::new();
    publisher.subscribe(Subscriber {
        handle: ConnectionHandle(1),
        protocol: 1,
        feed: 1,
        subscription: 1,
        sink: Arc::new(RecordingSink::refusing()),
    });
    publisher.subscribe(Subscriber {
        handle: ConnectionHandle(2),
        protocol: 1,
        feed: 1,
        subscription: 1,
        sink: Arc::new(RecordingSink::default()),
    });

    assert_eq!(publisher.publish(&1u8), 1);
    assert_eq!(publisher.subscriber_count(), 1);
}

#[test]
fn test_unsubscribe_is_scoped_to_connection() {
    let publisher = FeedPublisher::new();
    let sink = Arc::new(RecordingSink::default());
    for handle in [1, 2] {
        publisher.subscribe(Subscriber {
            handle: ConnectionHandle(handle),
            protocol: 1,
            feed: 1,
            subscription: 9,
            sink: sink.clone(),
        });
    }

    assert!(publisher.unsubscribe(ConnectionHandle(1), 9));
    assert!(!publisher.unsubscribe(ConnectionHandle(1), 9));
    assert_eq!(publisher.subscriber_count(), 1);
}
