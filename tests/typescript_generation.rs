//! TypeScript Generation Tests
//!
//! Validates that the types a UI consumes can be exported to TypeScript
//! when the tauri feature is enabled.

#[cfg(feature = "tauri")]
#[test]
fn test_core_types_implement_specta_type() {
    use specta::Type;

    // If this compiles, all types are properly configured for TypeScript export.
    fn assert_type<T: Type>() {}

    // Identity
    assert_type::<runlink::RunId>();
    assert_type::<runlink::PeerId>();
    assert_type::<runlink::LocalProfile>();
    assert_type::<runlink::PartnerProfile>();

    // Display and events
    assert_type::<runlink::PartnerDisplay>();
    assert_type::<runlink::Coordinate>();
    assert_type::<runlink::ConnectionStatus>();
    assert_type::<runlink::LinkState>();
    assert_type::<runlink::RunPhase>();
    assert_type::<runlink::RunEvent>();
    assert_type::<runlink::Runner>();
    assert_type::<runlink::EndReason>();
    assert_type::<runlink::UpdateRate>();
}

#[cfg(not(feature = "tauri"))]
#[test]
fn test_tauri_feature_disabled() {
    // Types still compile without specta::Type
    let _ = runlink::UpdateRate::Native;
    let _ = runlink::RunPhase::Idle;
}
