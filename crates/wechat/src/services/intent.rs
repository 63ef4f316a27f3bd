//! Recognizes statistics questions in chat text.
//!
//! Anything not recognized here is treated as a bookkeeping entry. Questions
//! carry no amounts, so text with digits is only read as a query when it asks
//! for a number of recent transactions.

use chrono::{Datelike, Days, NaiveDate};

use super::{Period, StatsQuery};

/// Recent transactions shown when the text names no count.
pub const DEFAULT_RECENT: u32 = 5;

/// Upper bound on the recent-transactions count.
pub const MAX_RECENT: u32 = 20;

const BALANCE: &[&str] = &["查看余额", "余额查询", "账本统计", "余额"];
const CATEGORIES: &[&str] = &["分类统计", "消费统计", "分类汇总"];
const RECENT_NOUNS: &[&str] = &["记录", "账单", "交易", "明细", "流水", "记账", "笔"];
const RANGE_QUESTIONS: &[&str] = &[
    "多少", "统计", "汇总", "账单", "支出", "收入", "消费", "开销", "花费", "花了", "花销",
];

fn has(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| text.contains(w))
}

/// First run of ASCII digits in `text`.
fn first_number(text: &str) -> Option<u32> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let digits: String = text
        .get(start..)?
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// Date range named by `text`, relative to `today`.
fn time_range(text: &str, today: NaiveDate) -> Option<(NaiveDate, NaiveDate, Period)> {
    let week_start = today.checked_sub_days(Days::new(u64::from(
        today.weekday().num_days_from_monday(),
    )))?;
    let month_start = today.with_day(1)?;

    if has(text, &["今天", "今日"]) {
        Some((today, today, Period::Day))
    } else if text.contains("昨天") {
        let yesterday = today.pred_opt()?;
        Some((yesterday, yesterday, Period::Day))
    } else if has(text, &["本周", "这周", "这个星期", "本星期"]) {
        Some((week_start, today, Period::Week))
    } else if has(text, &["上周", "上个星期"]) {
        let end = week_start.pred_opt()?;
        Some((end.checked_sub_days(Days::new(6))?, end, Period::Week))
    } else if has(text, &["本月", "这个月", "这月"]) {
        Some((month_start, today, Period::Month))
    } else if has(text, &["上月", "上个月"]) {
        let end = month_start.pred_opt()?;
        Some((end.with_day(1)?, end, Period::Month))
    } else if has(text, &["今年", "本年"]) {
        Some((NaiveDate::from_ymd_opt(today.year(), 1, 1)?, today, Period::Year))
    } else {
        None
    }
}

/// The statistics query `text` asks for, if any. `today` is the user's
/// local date.
#[must_use]
pub fn recognize(text: &str, today: NaiveDate) -> Option<StatsQuery> {
    let has_digits = text.chars().any(|c| c.is_ascii_digit());

    if text.contains("最近") && has(text, RECENT_NOUNS) {
        let limit = first_number(text).map_or(DEFAULT_RECENT, |n| n.clamp(1, MAX_RECENT));
        return Some(StatsQuery::Recent { limit });
    }
    if has_digits {
        return None;
    }

    if text.contains("预算") {
        Some(StatsQuery::Budget)
    } else if has(text, CATEGORIES) {
        Some(StatsQuery::Categories)
    } else if has(text, BALANCE) {
        Some(StatsQuery::Balance)
    } else if has(text, RANGE_QUESTIONS) {
        time_range(text, today).map(|(start, end, period)| StatsQuery::TimeRange {
            start,
            end,
            period,
        })
    } else {
        None
    }
}
