mod visit;

pub use visit::{
    DateRange, ExportBundle, ExportSummary, IpStat, NewVisit, RecordedVisit, Summary, Visit,
    VisitRequest, DEFAULT_REFERER, DEFAULT_USER_AGENT,
};
