// src/authorizer/tests.rs

use super::*;
use crate::device::DeviceProfile;
use crate::test_fixtures::{FakeChannel, FakeDevice, fake_pool};
use std::time::Duration;

fn pools() -> ChannelPools {
    ChannelPools::new(
        Arc::new(FakeDevice::new(DeviceProfile::default())),
        PoolOptions::default().with_recycle_delay(Duration::from_secs(1)),
    )
}

#[test]
fn test_kind_roundtrip() {
    for kind in [
        AuthorizerKind::Global,
        AuthorizerKind::None,
        AuthorizerKind::Root,
        AuthorizerKind::Shizuku,
        AuthorizerKind::Dhizuku,
        AuthorizerKind::Customize,
    ] {
        assert_eq!(AuthorizerKind::parse(kind.as_str()), Some(kind));
    }
    assert_eq!(AuthorizerKind::parse("magisk"), None);
}

#[test]
fn test_uninstall_flags_mask_unknown_bits() {
    let flags = UninstallFlags::from_bits(0xff);
    assert_eq!(flags.bits(), 0x3);
    assert!(flags.keep_data());
    assert!(flags.all_users());
}

#[tokio::test]
async fn test_global_is_never_routed() {
    let pools = pools();
    assert!(matches!(
        pools.authorizer(AuthorizerKind::Global, None),
        Err(Error::ConfigResolution(_))
    ));
}

#[tokio::test]
async fn test_customize_requires_command() {
    let pools = pools();
    assert!(pools.authorizer(AuthorizerKind::Customize, Some("  ")).is_err());
    let auth = pools
        .authorizer(AuthorizerKind::Customize, Some("su -c sh"))
        .unwrap();
    assert_eq!(auth.kind(), AuthorizerKind::Customize);
}

#[tokio::test]
async fn test_same_kind_shares_pool() {
    let pools = pools();
    let a = pools.pool(AuthorizerKind::Root, None).unwrap();
    let b = pools.pool(AuthorizerKind::Root, None).unwrap();
    let _ha = a.acquire().unwrap();
    assert_eq!(b.reference_count(), 1);
}

#[tokio::test]
async fn test_call_connects_lazily() {
    let channel = Arc::new(FakeChannel::new(AuthorizerKind::Root));
    let (pool, made) = fake_pool(vec![channel.clone()]);
    let auth = Authorizer::new(AuthorizerKind::Root, pool.clone());
    assert_eq!(channel.state(), ChannelState::Disconnected);

    let out = auth.exec(&["id".to_string()]).await.unwrap();
    assert!(out.success());
    assert_eq!(channel.state(), ChannelState::Connected);
    assert_eq!(made(), 1);
    assert_eq!(pool.reference_count(), 1);

    auth.release();
    assert!(!auth.is_holding());
    assert_eq!(pool.reference_count(), 0);
}

#[tokio::test]
async fn test_dead_channel_is_retried_once() {
    let first = Arc::new(FakeChannel::new(AuthorizerKind::Shizuku));
    first.fail_next(Error::ChannelDead("shizuku".to_string()));
    let second = Arc::new(FakeChannel::new(AuthorizerKind::Shizuku));
    let (pool, made) = fake_pool(vec![first.clone(), second.clone()]);
    let auth = Authorizer::new(AuthorizerKind::Shizuku, pool);

    auth.uninstall("com.example", UninstallFlags::default())
        .await
        .unwrap();
    assert_eq!(made(), 2);
    assert!(first.uninstalled().is_empty());
    assert_eq!(second.uninstalled(), vec!["com.example".to_string()]);
}

#[tokio::test]
async fn test_second_dead_channel_is_surfaced() {
    let first = Arc::new(FakeChannel::new(AuthorizerKind::Shizuku));
    first.fail_next(Error::ChannelDead("shizuku".to_string()));
    let second = Arc::new(FakeChannel::new(AuthorizerKind::Shizuku));
    second.fail_next(Error::ChannelDead("shizuku".to_string()));
    let third = Arc::new(FakeChannel::new(AuthorizerKind::Shizuku));
    let (pool, made) = fake_pool(vec![first, second, third.clone()]);
    let auth = Authorizer::new(AuthorizerKind::Shizuku, pool);

    let result = auth.uninstall("com.example", UninstallFlags::default()).await;
    assert!(matches!(result, Err(Error::ChannelDead(_))));
    assert_eq!(made(), 2);
    assert!(third.uninstalled().is_empty());
}

#[tokio::test]
async fn test_rejection_is_not_retried() {
    let channel = Arc::new(FakeChannel::new(AuthorizerKind::Root));
    channel.fail_next(Error::CommitRejected {
        code: -7,
        reason: "INSTALL_FAILED_UPDATE_INCOMPATIBLE".to_string(),
    });
    let (pool, made) = fake_pool(vec![channel.clone()]);
    let auth = Authorizer::new(AuthorizerKind::Root, pool);

    let result = auth
        .install_apks(
            &InstallParams::default(),
            &[("base.apk".to_string(), "/tmp/base.apk".into())],
        )
        .await;
    assert!(matches!(result, Err(Error::CommitRejected { code: -7, .. })));
    assert_eq!(made(), 1);
}

#[tokio::test]
async fn test_install_apks_stages_every_file() {
    let channel = Arc::new(FakeChannel::new(AuthorizerKind::Root));
    let (pool, _made) = fake_pool(vec![channel.clone()]);
    let auth = Authorizer::new(AuthorizerKind::Root, pool);

    auth.install_apks(
        &InstallParams {
            package_name: Some("com.example".to_string()),
            ..Default::default()
        },
        &[
            ("base.apk".to_string(), "/c/base.apk".into()),
            ("split_config.arm64_v8a.apk".to_string(), "/c/abi.apk".into()),
        ],
    )
    .await
    .unwrap();

    let commits = channel.commits();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].package_name.as_deref(), Some("com.example"));
    assert_eq!(
        commits[0].names,
        vec!["base.apk".to_string(), "split_config.arm64_v8a.apk".to_string()]
    );
}

#[tokio::test]
async fn test_override_pool_takes_precedence() {
    let channel = Arc::new(FakeChannel::new(AuthorizerKind::Root));
    let (pool, _made) = fake_pool(vec![channel.clone()]);
    let pools = pools().with_pool(AuthorizerKind::Root, pool.clone());

    let auth = pools.authorizer(AuthorizerKind::Root, None).unwrap();
    auth.exec(&["true".to_string()]).await.unwrap();
    assert_eq!(channel.execs().len(), 1);
}

#[tokio::test]
async fn test_stale_holder_does_not_tear_down_replacement() {
    let x = Arc::new(FakeChannel::new(AuthorizerKind::Root));
    let y = Arc::new(FakeChannel::new(AuthorizerKind::Root));
    let z = Arc::new(FakeChannel::new(AuthorizerKind::Root));
    let (pool, made) = fake_pool(vec![x.clone(), y.clone(), z.clone()]);
    let a = Authorizer::new(AuthorizerKind::Root, pool.clone());
    let b = Authorizer::new(AuthorizerKind::Root, pool.clone());

    a.exec(&["true".to_string()]).await.unwrap();
    b.exec(&["true".to_string()]).await.unwrap();
    assert_eq!(made(), 1);

    // X dies; A moves on to Y
    x.fail_next(Error::ChannelDead("root".to_string()));
    x.fail_next(Error::ChannelDead("root".to_string()));
    a.exec(&["id".to_string()]).await.unwrap();
    assert_eq!(made(), 2);
    assert_eq!(x.state(), ChannelState::Disconnected);

    // B still holds X but must join Y instead of reviving X or resetting Y
    b.exec(&["id".to_string()]).await.unwrap();
    assert_eq!(made(), 2);
    assert_eq!(x.connects(), 1);
    assert_eq!(x.state(), ChannelState::Disconnected);
    assert_eq!(y.state(), ChannelState::Connected);
    assert_eq!(z.state(), ChannelState::Disconnected);
    assert_eq!(y.execs().len(), 2);
    assert_eq!(pool.reference_count(), 2);
}

#[tokio::test]
async fn test_late_dead_report_spares_replacement() {
    let x = Arc::new(FakeChannel::new(AuthorizerKind::Root));
    let y = Arc::new(FakeChannel::new(AuthorizerKind::Root));
    let (pool, made) = fake_pool(vec![x.clone(), y.clone()]);
    let a = Authorizer::new(AuthorizerKind::Root, pool.clone());
    let b = Authorizer::new(AuthorizerKind::Root, pool.clone());
    a.exec(&["true".to_string()]).await.unwrap();
    b.exec(&["true".to_string()]).await.unwrap();

    // A replaces X with Y, then B reports X dead after the fact
    x.fail_next(Error::ChannelDead("root".to_string()));
    a.exec(&["id".to_string()]).await.unwrap();
    b.reset();

    assert_eq!(made(), 2);
    assert!(pool.is_live());
    assert_eq!(y.state(), ChannelState::Connected);
    assert!(!b.is_holding());
}
