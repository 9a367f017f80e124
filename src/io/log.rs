// ============================================================================
// src/io/log.rs - Kernel Logging System using the `log` crate
// ============================================================================
//!
//! カーネル用ロギングシステム。
//!
//! ## 機能
//! - `log`クレートを使用した標準的なログインターフェース
//! - 出力先は [`LogSink`] として外から差し込む（シリアル、コンソール等）
//! - コンパイル時のログレベルフィルタリング (`verbose_logging` feature)
//! - マルチコア安全なSpinlock保護
//!
//! ## 使用方法
//! ```ignore
//! static SERIAL: MySerialSink = MySerialSink;
//! rany_vfs::io::log::init(&SERIAL)?;
//! log::info!("vfs ready");
//! ```

use core::fmt::{self, Write};
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::{Mutex, Once};

// ============================================================================
// ログレベル定義
// ============================================================================

/// コンパイル時のログレベル（featureで変更可能）
#[cfg(feature = "verbose_logging")]
const MAX_LOG_LEVEL: LevelFilter = LevelFilter::Trace;

#[cfg(not(feature = "verbose_logging"))]
const MAX_LOG_LEVEL: LevelFilter = LevelFilter::Info;

// ============================================================================
// ロガー状態管理
// ============================================================================

/// ログの出力先
pub trait LogSink: Send + Sync {
    /// 文字列をそのまま出力する。失敗は黙って捨てる。
    fn write_str(&self, s: &str);
}

/// ロガーの初期化状態
static LOGGER_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// 現在のログレベル（実行時変更可能）
static CURRENT_LOG_LEVEL: AtomicU8 = AtomicU8::new(LevelFilter::Info as u8);

/// 出力先
static SINK: Once<&'static dyn LogSink> = Once::new();

/// 出力先の排他制御用Spinlock
///
/// 注意: パニック中はデッドロック回避のためロックを取らずに直接出力する。
static SINK_LOCK: Mutex<()> = Mutex::new(());

/// パニック中フラグ（デッドロック回避用）
static IN_PANIC: AtomicBool = AtomicBool::new(false);

// ============================================================================
// ロガー実装
// ============================================================================

/// カーネル用ロガー
struct KernelLogger;

/// `fmt::Write` を出力先に中継する
struct SinkWriter(&'static dyn LogSink);

impl Write for SinkWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_str(s);
        Ok(())
    }
}

impl KernelLogger {
    /// ログレベルのプレフィックスを取得
    fn level_prefix(level: Level) -> &'static str {
        match level {
            Level::Error => "[ERROR] ",
            Level::Warn => "[WARN]  ",
            Level::Info => "[INFO]  ",
            Level::Debug => "[DEBUG] ",
            Level::Trace => "[TRACE] ",
        }
    }

    /// 1レコード分を書き出す
    fn write_record(out: &mut impl Write, record: &Record) -> fmt::Result {
        out.write_str(Self::level_prefix(record.level()))?;

        // モジュールパス（オプション）
        if let Some(module) = record.module_path() {
            write!(out, "[{}] ", module)?;
        }

        writeln!(out, "{}", record.args())
    }
}

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= current_log_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let Some(&sink) = SINK.get() else {
            return;
        };

        // パニック中でなければロックを取得
        let _guard = if is_in_panic() {
            None
        } else {
            Some(SINK_LOCK.lock())
        };

        let _ = Self::write_record(&mut SinkWriter(sink), record);
    }

    fn flush(&self) {}
}

/// グローバルロガーインスタンス
static LOGGER: KernelLogger = KernelLogger;

// ============================================================================
// 公開API
// ============================================================================

/// ロギングシステムを初期化
///
/// `log` のグローバルロガーは一度しか設定できない。2回目以降はエラー。
pub fn init(sink: &'static dyn LogSink) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    SINK.call_once(|| sink);
    log::set_max_level(MAX_LOG_LEVEL);
    CURRENT_LOG_LEVEL.store(MAX_LOG_LEVEL as u8, Ordering::SeqCst);
    LOGGER_INITIALIZED.store(true, Ordering::SeqCst);
    Ok(())
}

/// パニック状態を設定（デッドロック回避用）
///
/// パニックハンドラの最初で呼び出す。
pub fn enter_panic_mode() {
    IN_PANIC.store(true, Ordering::SeqCst);
}

/// 現在パニック中かどうか
pub fn is_in_panic() -> bool {
    IN_PANIC.load(Ordering::Relaxed)
}

/// 実行時にログレベルを変更
pub fn set_log_level(level: LevelFilter) {
    CURRENT_LOG_LEVEL.store(level as u8, Ordering::SeqCst);
    log::set_max_level(level);
}

/// 現在のログレベルを取得
pub fn current_log_level() -> LevelFilter {
    LevelFilter::iter()
        .nth(CURRENT_LOG_LEVEL.load(Ordering::Relaxed) as usize)
        .unwrap_or(LevelFilter::Info)
}

/// ロガーが初期化済みかどうか
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.load(Ordering::Relaxed)
}
