//! Index texts in the shape published by the reforecast archives.

/// Legacy (version 2) ensemble archive index, `.inv` flavour.
///
/// Six records: mean sea level pressure and 700/900 hPa temperature at
/// 6 and 12 hours. The last record runs to the end of the file.
pub const REFORECAST_V2_INV: &str = "\
1:0:d=2000010100:PRMSL:mean sea level:6 hour fcst:ENS=low-res ctl
2:87231:d=2000010100:TMP:700 mb:6 hour fcst:ENS=low-res ctl
3:160902:d=2000010100:TMP:900 mb:6 hour fcst:ENS=low-res ctl
4:236118:d=2000010100:PRMSL:mean sea level:12 hour fcst:ENS=low-res ctl
5:323090:d=2000010100:TMP:700 mb:12 hour fcst:ENS=low-res ctl
6:396744:d=2000010100:TMP:900 mb:12 hour fcst:ENS=low-res ctl
";

/// Version 12 archive index for the first forecast window (days 1-10).
pub const GEFS_V12_NEAR_IDX: &str = "\
1:0:d=2000010100:APCP:surface:0-3 hour acc fcst:ENS=low-res ctl
2:41017:d=2000010100:APCP:surface:3-6 hour acc fcst:ENS=low-res ctl
3:80411:d=2000010100:APCP:surface:6-9 hour acc fcst:ENS=low-res ctl
4:121876:d=2000010100:APCP:surface:9-12 hour acc fcst:ENS=low-res ctl
";

/// Version 12 archive index for the extended forecast window (days 10-16).
pub const GEFS_V12_FAR_IDX: &str = "\
1:0:d=2000010100:APCP:surface:240-246 hour acc fcst:ENS=low-res ctl
2:39808:d=2000010100:APCP:surface:246-252 hour acc fcst:ENS=low-res ctl
";

/// Index with an undecodable step on its third line.
pub const BROKEN_STEP_INV: &str = "\
1:0:d=2000010100:TMP:700 mb:6 hour fcst:ENS=low-res ctl
2:70000:d=2000010100:TMP:900 mb:6 hour fcst:ENS=low-res ctl
3:140000:d=2000010100:TMP:700 mb:xyz:ENS=low-res ctl
";
