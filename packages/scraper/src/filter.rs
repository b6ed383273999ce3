//! Request body of the Maya report filter endpoint.

use chrono::{NaiveDate, NaiveTime};
use maya_notification_models::Period;
use serde::Serialize;

/// Disclosure categories selected by every request.
pub const EVENT_CODES: &[u32] = &[1400, 600, 1200, 1500, 900];

/// Disclosure sub-categories selected by every request.
pub const SUB_EVENT_CODES: &[u32] = &[
    213, 221, 223, 224, 230, 238, //
    305, 306, 307, 308, 311, 314, 330, //
    601, 602, 603, 604, 605, 606, //
    611, 612, 613, 614, 615, 616, //
    620, 621, 622, //
    901, 902, 903, 904, 905, 906, 908, 909, 910, 911, 912, //
    1201, //
    1401, 1402, 1403, 1404, 1405, 1406, //
    1501, 1502, 1503, 1504,
];

const EVENT_FILTER_TYPE: u8 = 8;
const SUB_EVENT_FILTER_TYPE: u8 = 7;

/// JSON body posted to the filter endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FilterRequest {
    /// One-based page number.
    pub page: u32,
    /// Category and sub-category selections.
    pub group_data: Vec<FilterGroup>,
    /// Period start, midnight UTC.
    pub date_from: String,
    /// Period end, midnight UTC.
    pub date_to: String,
    pub is_breaking_announcement: bool,
    pub is_for_tase_member: bool,
    pub is_specific_fund: bool,
    pub q_opt: u8,
    pub view_page: u8,
}

/// A list of selected codes of one filter type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FilterGroup {
    pub data_list: Vec<FilterCode>,
}

/// A single selected code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FilterCode {
    pub cd: u32,
    pub desc: &'static str,
    pub is_selected: bool,
    #[serde(rename = "VFType")]
    pub vf_type: u8,
}

fn group(codes: &[u32], vf_type: u8) -> FilterGroup {
    FilterGroup {
        data_list: codes
            .iter()
            .map(|&cd| FilterCode {
                cd,
                desc: "",
                is_selected: true,
                vf_type,
            })
            .collect(),
    }
}

fn utc_midnight(date: NaiveDate) -> String {
    date.and_time(NaiveTime::MIN).and_utc().to_rfc3339()
}

/// Builds the request body for zero-based `page` of `period`.
#[must_use]
pub fn filter_request(period: &Period, page: u32) -> FilterRequest {
    FilterRequest {
        page: page + 1,
        group_data: vec![
            group(EVENT_CODES, EVENT_FILTER_TYPE),
            group(SUB_EVENT_CODES, SUB_EVENT_FILTER_TYPE),
        ],
        date_from: utc_midnight(period.start),
        date_to: utc_midnight(period.end),
        is_breaking_announcement: false,
        is_for_tase_member: false,
        is_specific_fund: false,
        q_opt: 1,
        view_page: 2,
    }
}
