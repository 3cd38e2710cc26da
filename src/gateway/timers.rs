/// 一定間隔の定期処理
///
/// ゲートウェイのポーリングタスクは 100ms ごとに回り、各 Ticker に
/// 期限が来たかを尋ねます。時刻は起動からのミリ秒で渡します。
#[derive(Debug, Clone, Copy)]
pub struct Ticker {
    interval_ms: u64,
    next_due_ms: u64,
}

impl Ticker {
    /// `first_delay_ms` 後に最初の期限、その後は `interval_ms` ごと
    pub fn new(first_delay_ms: u64, interval_ms: u64) -> Self {
        Self {
            interval_ms: interval_ms.max(1),
            next_due_ms: first_delay_ms,
        }
    }

    /// 期限が来ていれば次の期限を設定して true
    ///
    /// 大きく遅れた場合も1回だけ発火し、次の期限は現在時刻から数えます。
    pub fn due(&mut self, now_ms: u64) -> bool {
        if now_ms < self.next_due_ms {
            return false;
        }
        let next = self.next_due_ms + self.interval_ms;
        self.next_due_ms = if next <= now_ms {
            now_ms + self.interval_ms
        } else {
            next
        };
        true
    }

    pub fn next_due_ms(&self) -> u64 {
        self.next_due_ms
    }
}

/// レベル入力のデバウンス
///
/// 生のレベルが `stable_ms` の間変わらなかったときだけ確定レベルを更新します。
/// それより短いパルスは捨てます。
#[derive(Debug, Clone, Copy)]
pub struct Debouncer {
    stable_ms: u64,
    stable: bool,
    candidate: bool,
    candidate_since_ms: u64,
}

impl Debouncer {
    pub fn new(stable_ms: u64) -> Self {
        Self {
            stable_ms,
            stable: false,
            candidate: false,
            candidate_since_ms: 0,
        }
    }

    /// 確定しているレベル
    pub fn level(&self) -> bool {
        self.stable
    }

    /// 生のレベルを1回分渡す。確定レベルが変わったときだけ新しいレベルを返す
    pub fn update(&mut self, raw: bool, now_ms: u64) -> Option<bool> {
        if raw != self.candidate {
            self.candidate = raw;
            self.candidate_since_ms = now_ms;
        }
        if self.candidate == self.stable
            || now_ms.saturating_sub(self.candidate_since_ms) < self.stable_ms
        {
            return None;
        }
        self.stable = self.candidate;
        Some(self.stable)
    }
}
