// ============================================================================
// src/sync/preempt.rs - プリエンプション禁止カウンタ
//
// スケジューラはコンテキストスイッチ前にこのカウンタを確認する。
// カウンタが0でない間はブロックしうるVFS呼び出しをしてはならない。
// ============================================================================

use core::marker::PhantomData;
use core::sync::atomic::{AtomicUsize, Ordering};

/// ネストしたプリエンプション禁止の深さ
static PREEMPT_DISABLE_COUNT: AtomicUsize = AtomicUsize::new(0);

/// プリエンプションが有効かどうか
pub fn is_preemption_enabled() -> bool {
    PREEMPT_DISABLE_COUNT.load(Ordering::Acquire) == 0
}

/// プリエンプションを禁止する
///
/// 返されたガードがドロップされると禁止が1段解除される。
pub fn disable_preemption() -> PreemptGuard {
    PREEMPT_DISABLE_COUNT.fetch_add(1, Ordering::AcqRel);
    PreemptGuard {
        _not_send: PhantomData,
    }
}

/// プリエンプション禁止ガード
///
/// 禁止したコンテキストで解除しなければならないため `Send` ではない。
pub struct PreemptGuard {
    _not_send: PhantomData<*mut ()>,
}

impl Drop for PreemptGuard {
    fn drop(&mut self) {
        let prev = PREEMPT_DISABLE_COUNT.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unbalanced preemption enable");
    }
}
