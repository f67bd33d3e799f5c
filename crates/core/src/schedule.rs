//! 六字段调度表达式的解析与时间点推导
//!
//! ```text
//! ┌───────────── 秒 (0-59)
//! │ ┌───────────── 分 (0-59)
//! │ │ ┌───────────── 时 (0-23)
//! │ │ │ ┌───────────── 日 (1-31, 支持 ?)
//! │ │ │ │ ┌───────────── 月 (0-11, 支持 JAN-DEC)
//! │ │ │ │ │ ┌───────────── 周 (0-7, 7等价于0, 支持 SUN-SAT, 支持 ?)
//! │ │ │ │ │ │
//! 0 0 12 * * ?
//! ```
//!
//! 每个字段支持 `*`、单值、`a-b` 区间、`a-b/n` 与 `*/n` 步进以及逗号列表;
//! 月份与星期还支持大小写不敏感的三字母英文名(可用于区间, 如 `MON-FRI`)。
//! 日和周字段同时受限时取两者的交集, `?` 与 `*` 等价于全集。

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Offset, TimeZone, Timelike, Utc};

use crate::errors::{TimerError, TimerResult};

const MONTH_NAMES: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const WEEKDAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// 搜索时允许越过的最大年数
const MAX_YEAR_SPAN: i32 = 4;
/// 搜索时允许尝试的最大日期候选数
const MAX_DAY_CANDIDATES: u32 = 366;

/// 字段的解析规则描述
struct FieldSpec {
    label: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    allows_question: bool,
    // 星期字段的 7 折叠为 0
    fold_modulo: Option<u32>,
}

const SECOND_FIELD: FieldSpec = FieldSpec {
    label: "秒",
    min: 0,
    max: 59,
    names: &[],
    allows_question: false,
    fold_modulo: None,
};
const MINUTE_FIELD: FieldSpec = FieldSpec {
    label: "分",
    min: 0,
    max: 59,
    names: &[],
    allows_question: false,
    fold_modulo: None,
};
const HOUR_FIELD: FieldSpec = FieldSpec {
    label: "时",
    min: 0,
    max: 23,
    names: &[],
    allows_question: false,
    fold_modulo: None,
};
const DAY_OF_MONTH_FIELD: FieldSpec = FieldSpec {
    label: "日",
    min: 1,
    max: 31,
    names: &[],
    allows_question: true,
    fold_modulo: None,
};
const MONTH_FIELD: FieldSpec = FieldSpec {
    label: "月",
    min: 0,
    max: 11,
    names: &MONTH_NAMES,
    allows_question: false,
    fold_modulo: None,
};
const DAY_OF_WEEK_FIELD: FieldSpec = FieldSpec {
    label: "周",
    min: 0,
    max: 7,
    names: &WEEKDAY_NAMES,
    allows_question: true,
    fold_modulo: Some(7),
};

/// 已解析的调度表达式
///
/// 解析阶段把每个字段展开成位向量, 推导下一次触发时间只需按位检查,
/// 不再接触原始字符串。
#[derive(Debug, Clone)]
pub struct ScheduleExpression {
    expr: String,
    seconds: u64,
    minutes: u64,
    hours: u32,
    days_of_month: u32,
    months: u16,
    days_of_week: u8,
}

impl ScheduleExpression {
    /// 解析六字段表达式, 非法输入返回指明字段的错误
    pub fn parse(expr: &str) -> TimerResult<Self> {
        let parts: Vec<&str> = expr.split_whitespace().collect();
        if parts.len() != 6 {
            return Err(TimerError::schedule_parse(
                "表达式",
                format!("需要6个字段, 实际为{}个", parts.len()),
            ));
        }

        Ok(Self {
            expr: expr.to_string(),
            seconds: parse_field(parts[0], &SECOND_FIELD)?,
            minutes: parse_field(parts[1], &MINUTE_FIELD)?,
            hours: parse_field(parts[2], &HOUR_FIELD)? as u32,
            days_of_month: parse_field(parts[3], &DAY_OF_MONTH_FIELD)? as u32,
            months: parse_field(parts[4], &MONTH_FIELD)? as u16,
            days_of_week: parse_field(parts[5], &DAY_OF_WEEK_FIELD)? as u8,
        })
    }

    /// 仅校验表达式是否合法
    pub fn validate(expr: &str) -> TimerResult<()> {
        Self::parse(expr).map(|_| ())
    }

    /// 原始表达式字符串
    pub fn source(&self) -> &str {
        &self.expr
    }

    /// 计算严格晚于 `from` 的下一次触发时间
    ///
    /// 先把 `from` 取整到下一个整秒, 再在给定时区的本地时间里按
    /// 秒→分→时→日期的顺序逐级搜索; 任何一级进位都会把更低的级别
    /// 重置到各自的最小合法值。日期须同时命中日字段和周字段。
    ///
    /// 日历上不可满足的组合(如2月30日)由两道防线拦截: 年份越过起点
    /// 4年, 或尝试的日期候选超过366个, 都会返回 `ScheduleOverflow`。
    pub fn next_after(
        &self,
        from: DateTime<Utc>,
        tz: FixedOffset,
    ) -> TimerResult<Option<DateTime<Utc>>> {
        let local = from.with_timezone(&tz).naive_local();
        let floored = local.with_nanosecond(0).unwrap_or(local);
        let start = floored + Duration::seconds(1);

        let start_year = start.year();
        let mut year = start.year();
        let mut month = start.month0();
        let mut day = start.day();
        let mut hour = start.hour();
        let mut minute = start.minute();
        let mut second = start.second();

        // 时分秒一次通过, 进位溢出交给日期循环
        match next_set(self.seconds, second) {
            Some(s) => second = s,
            None => {
                second = first_set(self.seconds);
                minute += 1;
            }
        }
        match next_set(self.minutes, minute) {
            Some(m) => {
                if m != minute {
                    second = first_set(self.seconds);
                }
                minute = m;
            }
            None => {
                minute = first_set(self.minutes);
                second = first_set(self.seconds);
                hour += 1;
            }
        }
        match next_set(self.hours, hour) {
            Some(h) => {
                if h != hour {
                    minute = first_set(self.minutes);
                    second = first_set(self.seconds);
                }
                hour = h;
            }
            None => {
                hour = first_set(self.hours);
                minute = first_set(self.minutes);
                second = first_set(self.seconds);
                day += 1;
            }
        }

        let mut candidates = 0u32;
        loop {
            if year > start_year + MAX_YEAR_SPAN {
                return Err(TimerError::ScheduleOverflow {
                    expr: self.expr.clone(),
                });
            }
            candidates += 1;
            if candidates > MAX_DAY_CANDIDATES {
                return Err(TimerError::ScheduleOverflow {
                    expr: self.expr.clone(),
                });
            }

            // 月份不合法: 跳到下一个合法月份的1日
            if self.months & (1 << month) == 0 {
                match next_set(self.months, month) {
                    Some(m) => month = m,
                    None => {
                        month = first_set(self.months);
                        year += 1;
                    }
                }
                day = 1;
                hour = first_set(self.hours);
                minute = first_set(self.minutes);
                second = first_set(self.seconds);
                continue;
            }

            // 日期超出当月天数: 滚动到下月
            if day > days_in_month(year, month) {
                month += 1;
                if month > 11 {
                    month = 0;
                    year += 1;
                }
                day = 1;
                hour = first_set(self.hours);
                minute = first_set(self.minutes);
                second = first_set(self.seconds);
                continue;
            }

            let weekday = weekday_of(year, month, day);
            let day_ok = self.days_of_month & (1 << day) != 0;
            let weekday_ok = self.days_of_week & (1 << weekday) != 0;
            if day_ok && weekday_ok {
                break;
            }

            day += 1;
            hour = first_set(self.hours);
            minute = first_set(self.minutes);
            second = first_set(self.seconds);
        }

        let date = match NaiveDate::from_ymd_opt(year, month + 1, day) {
            Some(d) => d,
            None => return Ok(None),
        };
        let naive = match date.and_hms_opt(hour, minute, second) {
            Some(t) => t,
            None => return Ok(None),
        };
        match tz.from_local_datetime(&naive).single() {
            Some(t) => Ok(Some(t.with_timezone(&Utc))),
            None => Ok(None),
        }
    }

    /// 从 `from` 起的若干次触发时间, 常用于预览与测试
    pub fn upcoming(
        &self,
        from: DateTime<Utc>,
        tz: FixedOffset,
        count: usize,
    ) -> TimerResult<Vec<DateTime<Utc>>> {
        let mut times = Vec::with_capacity(count);
        let mut cursor = from;
        for _ in 0..count {
            match self.next_after(cursor, tz)? {
                Some(t) => {
                    cursor = t;
                    times.push(t);
                }
                None => break,
            }
        }
        Ok(times)
    }

    /// 某个整秒时刻是否命中本表达式
    pub fn matches_instant(&self, at: DateTime<Utc>, tz: FixedOffset) -> bool {
        let local = at.with_timezone(&tz).naive_local();
        let month = local.month0();
        let weekday = weekday_of(local.year(), month, local.day());
        self.seconds & (1 << local.second()) != 0
            && self.minutes & (1 << local.minute()) != 0
            && self.hours & (1 << local.hour()) != 0
            && self.months & (1 << month) != 0
            && self.days_of_month & (1 << local.day()) != 0
            && self.days_of_week & (1 << weekday) != 0
    }

    /// 规范化的表达式字符串
    ///
    /// 全集输出为 `*`, 其余按连续区间压缩为数字形式; 对结果再次
    /// `parse` 得到的位向量与本表达式完全一致。
    pub fn to_expression_string(&self) -> String {
        [
            render_field(self.seconds, 0, 59),
            render_field(self.minutes, 0, 59),
            render_field(self.hours as u64, 0, 23),
            render_field(self.days_of_month as u64, 1, 31),
            render_field(self.months as u64, 0, 11),
            render_field(self.days_of_week as u64, 0, 6),
        ]
        .join(" ")
    }

    /// UTC 对应的固定偏移
    pub fn utc_offset() -> FixedOffset {
        Utc.fix()
    }
}

/// 相等性只比较位向量, 与原始书写形式无关
impl PartialEq for ScheduleExpression {
    fn eq(&self, other: &Self) -> bool {
        self.seconds == other.seconds
            && self.minutes == other.minutes
            && self.hours == other.hours
            && self.days_of_month == other.days_of_month
            && self.months == other.months
            && self.days_of_week == other.days_of_week
    }
}

impl Eq for ScheduleExpression {}

impl FromStr for ScheduleExpression {
    type Err = TimerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScheduleExpression::parse(s)
    }
}

impl fmt::Display for ScheduleExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_expression_string())
    }
}

/// 解析时区偏移: `UTC`/`Z`/`±HH:MM`/`±HHMM`/`±HH`
pub fn parse_offset(s: &str) -> TimerResult<FixedOffset> {
    let trimmed = s.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("utc") || trimmed.eq_ignore_ascii_case("z")
    {
        return Ok(Utc.fix());
    }

    let invalid = || TimerError::Configuration(format!("无效的时区偏移: '{s}'"));

    let (sign, rest) = match trimmed.as_bytes().first() {
        Some(b'+') => (1i32, &trimmed[1..]),
        Some(b'-') => (-1i32, &trimmed[1..]),
        _ => return Err(invalid()),
    };
    let (hours_str, minutes_str) = match rest.find(':') {
        Some(idx) => (&rest[..idx], &rest[idx + 1..]),
        None if rest.len() > 2 => rest.split_at(2),
        None => (rest, "0"),
    };
    let hours: u32 = hours_str.parse().map_err(|_| invalid())?;
    let minutes: u32 = minutes_str.parse().map_err(|_| invalid())?;
    if hours > 23 || minutes > 59 {
        return Err(invalid());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60) as i32).ok_or_else(invalid)
}

fn parse_field(field: &str, spec: &FieldSpec) -> TimerResult<u64> {
    if field == "?" {
        if !spec.allows_question {
            return Err(TimerError::schedule_parse(
                spec.label,
                "'?'只允许出现在日和周字段",
            ));
        }
        return Ok(full_mask(spec.min, spec.max, spec.fold_modulo));
    }

    let mut mask = 0u64;
    for part in field.split(',') {
        mask |= parse_component(part.trim(), spec)?;
    }
    if mask == 0 {
        return Err(TimerError::schedule_parse(spec.label, "字段为空"));
    }
    Ok(mask)
}

fn parse_component(part: &str, spec: &FieldSpec) -> TimerResult<u64> {
    if part.is_empty() {
        return Err(TimerError::schedule_parse(spec.label, "空的列表项"));
    }

    let (range_part, step) = match part.find('/') {
        Some(idx) => {
            let step_str = &part[idx + 1..];
            let step: u32 = step_str.parse().map_err(|_| {
                TimerError::schedule_parse(spec.label, format!("无效的步进值 '{step_str}'"))
            })?;
            if step == 0 {
                return Err(TimerError::schedule_parse(spec.label, "步进值不能为0"));
            }
            (&part[..idx], Some(step))
        }
        None => (part, None),
    };

    let (start, end) = if range_part == "*" {
        (spec.min, spec.max)
    } else if let Some(idx) = find_range_separator(range_part) {
        let start = resolve_value(&range_part[..idx], spec)?;
        let end = resolve_value(&range_part[idx + 1..], spec)?;
        if start > end {
            return Err(TimerError::schedule_parse(
                spec.label,
                format!("区间起止顺序颠倒: {}-{}", start, end),
            ));
        }
        (start, end)
    } else {
        if step.is_some() {
            return Err(TimerError::schedule_parse(
                spec.label,
                "步进只能用于'*'或区间",
            ));
        }
        let value = resolve_value(range_part, spec)?;
        (value, value)
    };

    let mut mask = 0u64;
    let step = step.unwrap_or(1);
    let mut value = start;
    while value <= end {
        let bit = match spec.fold_modulo {
            Some(m) => value % m,
            None => value,
        };
        mask |= 1 << bit;
        value += step;
    }
    Ok(mask)
}

/// 区间分隔符的位置; 跳过开头以免把负号当作分隔符
fn find_range_separator(part: &str) -> Option<usize> {
    part.char_indices().skip(1).find(|&(_, c)| c == '-').map(|(i, _)| i)
}

fn resolve_value(token: &str, spec: &FieldSpec) -> TimerResult<u32> {
    if token.chars().all(|c| c.is_ascii_digit()) && !token.is_empty() {
        let value: u32 = token.parse().map_err(|_| {
            TimerError::schedule_parse(spec.label, format!("无效的数值 '{token}'"))
        })?;
        if value < spec.min || value > spec.max {
            return Err(TimerError::schedule_parse(
                spec.label,
                format!("数值{}超出范围[{}, {}]", value, spec.min, spec.max),
            ));
        }
        return Ok(value);
    }

    let upper = token.to_ascii_uppercase();
    spec.names
        .iter()
        .position(|n| *n == upper)
        .map(|idx| idx as u32)
        .ok_or_else(|| {
            TimerError::schedule_parse(spec.label, format!("无法识别的名称 '{token}'"))
        })
}

fn full_mask(min: u32, max: u32, fold_modulo: Option<u32>) -> u64 {
    let mut mask = 0u64;
    for v in min..=max {
        let bit = match fold_modulo {
            Some(m) => v % m,
            None => v,
        };
        mask |= 1 << bit;
    }
    mask
}

fn first_set(mask: impl Into<u64>) -> u32 {
    mask.into().trailing_zeros()
}

fn next_set(mask: impl Into<u64>, from: u32) -> Option<u32> {
    if from > 63 {
        return None;
    }
    let shifted = mask.into() >> from;
    if shifted == 0 {
        None
    } else {
        Some(from + shifted.trailing_zeros())
    }
}

fn render_field(mask: u64, min: u32, max: u32) -> String {
    if mask == full_mask(min, max, None) {
        return "*".to_string();
    }
    let mut runs: Vec<(u32, u32)> = Vec::new();
    for v in min..=max {
        if mask & (1 << v) == 0 {
            continue;
        }
        match runs.last_mut() {
            Some((_, end)) if *end + 1 == v => *end = v,
            _ => runs.push((v, v)),
        }
    }
    runs.iter()
        .map(|(a, b)| {
            if a == b {
                a.to_string()
            } else {
                format!("{a}-{b}")
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn days_in_month(year: i32, month0: u32) -> u32 {
    match month0 {
        0 | 2 | 4 | 6 | 7 | 9 | 11 => 31,
        3 | 5 | 8 | 10 => 30,
        _ => {
            if year % 4 == 0 && (year % 100 != 0 || year % 400 == 0) {
                29
            } else {
                28
            }
        }
    }
}

fn weekday_of(year: i32, month0: u32, day: u32) -> u32 {
    NaiveDate::from_ymd_opt(year, month0 + 1, day)
        .map(|d| d.weekday().num_days_from_sunday())
        .unwrap_or(0)
}
