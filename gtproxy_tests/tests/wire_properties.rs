//! Cross-crate checks of the wire-level contracts the relay depends on.

use gtproxy_shared::command::CommandRegistry;
use gtproxy_shared::packet::{classify, text_frame, MessageType, Payload};
use gtproxy_shared::variant::{Variant, VariantArg, VariantList};

/// Re-emitting a text frame from its parsed fields reproduces the
/// original prefix byte-for-byte.
#[test]
fn text_frames_rebuild_from_parsed_fields() -> anyhow::Result<()> {
    for (kind, body) in [
        (MessageType::ServerHello, "server|1.2.3.4\nport|17091"),
        (MessageType::GenericText, "action|input\ntext|/warp a|b"),
        (MessageType::GameMessage, "action|log\nmsg|hi there"),
    ] {
        let frame = text_frame(kind, body);
        let parsed = classify(&frame);
        match &parsed.payload {
            Payload::Text { kind, text, .. } => {
                assert_eq!(&text_frame(*kind, text)[..text.len() + 5], &frame[..]);
            }
            other => anyhow::bail!("expected text payload, got {other:?}"),
        }
    }
    Ok(())
}

/// A decoded variant list re-encodes byte-identically while untouched,
/// and every value survives the trip bit-exactly.
#[test]
fn variant_lists_roundtrip() {
    let list = VariantList::from_args(&[
        VariantArg::from("OnChangeSkin"),
        VariantArg::from(4294967295u32),
        VariantArg::from(-1.25),
        VariantArg::from(vec![0.5, -0.5, 126.0]),
    ]);
    let wire = list.encode();
    let decoded = VariantList::decode(&wire);
    assert_eq!(decoded.encode(), wire);
    assert_eq!(decoded.get(1), Some(&Variant::Unsigned(4294967295)));
    assert_eq!(decoded.get(2), Some(&Variant::Float(-1.25)));
    assert_eq!(decoded.get(3), Some(&Variant::Vec3([0.5, -0.5, 126.0])));
}

/// Tag selection favors the smallest faithful integer tag and falls back
/// to strings for anything a wire number cannot carry.
#[test]
fn variant_tags_choose_smallest_faithful_encoding() {
    assert_eq!(
        VariantArg::from(4294967295u32).classify().type_tag(),
        Variant::Unsigned(0).type_tag()
    );
    assert_eq!(
        VariantArg::from(-5.0).classify().type_tag(),
        Variant::Signed(0).type_tag()
    );
    assert_eq!(
        VariantArg::Num(f64::INFINITY).classify(),
        Variant::Str("inf".into())
    );
}

/// `execute` reports true exactly when a registered handler ran, which is
/// what the relay keys the drop-from-wire decision on.
#[test]
fn command_execution_contract() {
    let mut registry: CommandRegistry<u32> = CommandRegistry::new('/');
    registry.register("warp", |_args, hits| {
        *hits += 1;
        Ok(())
    });

    let mut hits = 0u32;
    assert!(registry.execute("/warp FOO", &mut hits));
    assert!(registry.execute("\u{feff}/WARP", &mut hits));
    assert!(!registry.execute("warp FOO", &mut hits));
    assert!(!registry.execute("/unregistered", &mut hits));
    assert_eq!(hits, 2);
}
