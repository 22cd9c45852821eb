// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! OPeNDAP (DAP2) grid source.
//!
//! Structure comes from `<url>.dds`; hyperslabs from
//! `<url>.ascii?var[start:1:stop]...` with inclusive stops. Packing and
//! missing-value attributes come from `<url>.das` and are applied to every
//! slice, so values equal to `_FillValue` or `missing_value` read back as
//! NaN and packed integers are unpacked with `scale_factor`/`add_offset`.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use ndarray::{ArrayD, IxDyn};
use regex::Regex;
use tokio::sync::OnceCell;
use tracing::debug;
use url::Url;

use super::{FetchPolicy, GridMetadata, GridSource};
use crate::catalog::HttpFetcher;
use crate::error::{CoreError, Result};
use crate::model::VariableInfo;

static DDS_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(Byte|Int16|UInt16|Int32|UInt32|Float32|Float64|String|URL)\s+([\w\-.]+)((?:\s*\[[^\]]+\])*)\s*;",
    )
    .expect("valid DDS regex")
});

static DDS_DIM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\s*(?:([\w\-.]+)\s*=\s*)?(\d+)\s*\]")
        .expect("valid DDS dimension regex")
});

static ASCII_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][\w\-.]*)((?:\[\d+\])+)\s*$")
        .expect("valid ASCII header regex")
});

static DAS_CONTAINER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([\w\-.]+)\s*\{\s*$").expect("valid DAS container regex")
});

static DAS_ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(Byte|Int16|UInt16|Int32|UInt32|Float32|Float64|String|URL)\s+([\w\-.]+)\s+(.*?);\s*$",
    )
    .expect("valid DAS attribute regex")
});

static ASCII_INDEX_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\[\d+\])+\s*,\s*").expect("valid index regex")
});

/// Missing-value and packing attributes of one variable.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Packing {
    pub missing: Vec<f64>,
    pub scale_factor: Option<f64>,
    pub add_offset: Option<f64>,
}

impl Packing {
    /// Mask raw values matching a missing marker, then unpack the rest.
    fn apply(&self, raw: f64) -> f64 {
        if raw.is_nan() || self.missing.iter().any(|&m| same_value(raw, m)) {
            return f64::NAN;
        }
        raw * self.scale_factor.unwrap_or(1.0) + self.add_offset.unwrap_or(0.0)
    }

    fn is_identity(&self) -> bool {
        self.missing.is_empty() && self.scale_factor.is_none() && self.add_offset.is_none()
    }
}

// Float32 attributes and ASCII data print with different digit counts.
fn same_value(a: f64, b: f64) -> bool {
    a == b || (a - b).abs() <= b.abs() * 1e-6
}

/// Remote dataset served by an OPeNDAP endpoint.
#[derive(Debug, Clone)]
pub struct OpendapSource {
    url: Url,
    fetcher: HttpFetcher,
    policy: FetchPolicy,
    attributes: Arc<OnceCell<BTreeMap<String, Packing>>>,
}

impl OpendapSource {
    pub(crate) fn new(url: Url, fetcher: HttpFetcher, policy: FetchPolicy) -> Self {
        Self {
            url,
            fetcher,
            policy,
            attributes: Arc::new(OnceCell::new()),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn with_suffix(&self, suffix: &str, query: Option<&str>) -> Result<Url> {
        let mut raw = format!("{}{}", self.url.as_str().trim_end_matches('/'), suffix);
        if let Some(q) = query {
            raw.push('?');
            raw.push_str(q);
        }
        Url::parse(&raw).map_err(|e| CoreError::validation("url", e.to_string()))
    }

    /// Attributes from the DAS, fetched once. A server without a DAS
    /// endpoint yields no attributes.
    async fn attributes(&self) -> Result<&BTreeMap<String, Packing>> {
        self.attributes
            .get_or_try_init(|| async {
                let url = self.with_suffix(".das", None)?;
                match self
                    .policy
                    .run("das", || self.fetcher.get_text(&url, "dataset"))
                    .await
                {
                    Ok(body) => parse_das(self.url.as_str(), &body),
                    Err(CoreError::NotFound { .. }) => {
                        debug!(url = %url, "No DAS available, reading values unmasked");
                        Ok(BTreeMap::new())
                    }
                    Err(e) => Err(e),
                }
            })
            .await
    }
}

#[async_trait]
impl GridSource for OpendapSource {
    async fn describe(&self) -> Result<GridMetadata> {
        let url = self.with_suffix(".dds", None)?;
        let body = self
            .policy
            .run("dds", || self.fetcher.get_text(&url, "dataset"))
            .await?;
        parse_dds(self.url.as_str(), &body)
    }

    async fn read(&self, variable: &str, ranges: &[Range<usize>]) -> Result<ArrayD<f64>> {
        let shape: Vec<usize> = ranges.iter().map(|r| r.len()).collect();
        if shape.contains(&0) {
            return Ok(ArrayD::zeros(IxDyn(&shape)));
        }

        let constraint = constraint_expression(variable, ranges);
        let url = self.with_suffix(".ascii", Some(&constraint))?;
        debug!(url = %url, "Fetching OPeNDAP hyperslab");
        let body = self
            .policy
            .run("ascii", || self.fetcher.get_text(&url, "dataset"))
            .await?;
        let mut values = parse_ascii(self.url.as_str(), &body, variable, &shape)?;
        if let Some(packing) = self.attributes().await?.get(variable)
            && !packing.is_identity()
        {
            values.mapv_inplace(|v| packing.apply(v));
        }
        Ok(values)
    }
}

/// `var[a:1:b][c:1:d]` with inclusive stops.
fn constraint_expression(variable: &str, ranges: &[Range<usize>]) -> String {
    let mut out = variable.to_string();
    for r in ranges {
        out.push_str(&format!("[{}:1:{}]", r.start, r.end - 1));
    }
    out
}

/// Parse a Dataset Descriptor Structure. The first declaration of a name
/// wins, so a Grid's array is kept over a later map of the same name.
pub(crate) fn parse_dds(source: &str, body: &str) -> Result<GridMetadata> {
    if !body.trim_start().starts_with("Dataset") {
        return Err(CoreError::format(source, "response is not a DDS document"));
    }

    let mut meta = GridMetadata::default();
    for line in body.lines() {
        let Some(caps) = DDS_DECL.captures(line) else {
            continue;
        };
        let name = caps[2].to_string();
        if meta.variables.contains_key(&name) {
            continue;
        }

        let mut dimensions = Vec::new();
        let mut shape = Vec::new();
        for (i, dim) in DDS_DIM.captures_iter(&caps[3]).enumerate() {
            let len: usize = dim[2]
                .parse()
                .map_err(|_| CoreError::format(source, format!("bad dimension size in '{}'", line.trim())))?;
            let dim_name = dim
                .get(1)
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| format!("{}_{}", name, i));
            match meta.dimensions.get(&dim_name) {
                Some(&existing) if existing != len => {
                    return Err(CoreError::format(
                        source,
                        format!("dimension '{}' has sizes {} and {}", dim_name, existing, len),
                    ));
                }
                _ => {
                    meta.dimensions.insert(dim_name.clone(), len);
                }
            }
            dimensions.push(dim_name);
            shape.push(len);
        }

        meta.variables.insert(
            name,
            VariableInfo {
                dtype: caps[1].to_ascii_lowercase(),
                dimensions,
                shape,
            },
        );
    }

    if meta.variables.is_empty() {
        return Err(CoreError::format(source, "DDS declares no variables"));
    }
    Ok(meta)
}

/// Parse a Dataset Attribute Structure into per-variable packing.
///
/// Attributes belong to the innermost enclosing container, so a Grid's
/// array attributes land under the array name.
pub(crate) fn parse_das(source: &str, body: &str) -> Result<BTreeMap<String, Packing>> {
    if !body.trim_start().starts_with("Attributes") {
        return Err(CoreError::format(source, "response is not a DAS document"));
    }

    let mut containers: Vec<String> = Vec::new();
    let mut out: BTreeMap<String, Packing> = BTreeMap::new();
    for line in body.lines() {
        if let Some(caps) = DAS_CONTAINER.captures(line) {
            containers.push(caps[1].to_string());
            continue;
        }
        if line.trim_start().starts_with('}') {
            containers.pop();
            continue;
        }
        let Some(caps) = DAS_ATTRIBUTE.captures(line) else {
            continue;
        };
        let Some(variable) = containers.last() else {
            continue;
        };
        if matches!(&caps[1], "String" | "URL") {
            continue;
        }
        let numbers = || -> Result<Vec<f64>> {
            caps[3]
                .split(',')
                .map(str::trim)
                .map(|t| {
                    t.parse::<f64>().map_err(|_| {
                        CoreError::format(source, format!("bad attribute value '{}'", t))
                    })
                })
                .collect()
        };
        match &caps[2] {
            "_FillValue" | "missing_value" => {
                out.entry(variable.clone())
                    .or_default()
                    .missing
                    .extend(numbers()?);
            }
            "scale_factor" => {
                out.entry(variable.clone()).or_default().scale_factor =
                    numbers()?.first().copied();
            }
            "add_offset" => {
                out.entry(variable.clone()).or_default().add_offset =
                    numbers()?.first().copied();
            }
            _ => {}
        }
    }
    Ok(out)
}

/// Extract the values of `variable` from an ASCII data response.
pub(crate) fn parse_ascii(
    source: &str,
    body: &str,
    variable: &str,
    shape: &[usize],
) -> Result<ArrayD<f64>> {
    if body.trim_start().starts_with("Error") {
        return Err(CoreError::format(source, first_line(body)));
    }

    let data = match body.find("\n---") {
        Some(pos) => body[pos + 1..]
            .split_once('\n')
            .map(|(_, rest)| rest)
            .unwrap_or(""),
        None => body,
    };

    // (last name segment, header shape, values) per block, in response order
    let mut blocks: Vec<(String, Vec<usize>, Vec<f64>)> = Vec::new();

    for line in data.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(caps) = ASCII_HEADER.captures(line) {
            let name = &caps[1];
            let header_shape: Vec<usize> = DDS_DIM
                .captures_iter(&caps[2])
                .filter_map(|d| d[2].parse().ok())
                .collect();
            let short = name.rsplit('.').next().unwrap_or(name).to_string();
            blocks.push((short, header_shape, Vec::new()));
            continue;
        }

        let Some((_, _, block)) = blocks.last_mut() else {
            continue;
        };
        let values = ASCII_INDEX_PREFIX.replace(line, "");
        for token in values.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let v: f64 = token.parse().map_err(|_| {
                CoreError::format(source, format!("unparseable value '{}'", token))
            })?;
            block.push(v);
        }
    }

    let Some((_, header_shape, values)) = blocks.into_iter().find(|(n, _, _)| n == variable)
    else {
        return Err(CoreError::format(
            source,
            format!("no data block for '{}'", variable),
        ));
    };

    if header_shape != shape {
        return Err(CoreError::format(
            source,
            format!("expected shape {:?}, server sent {:?}", shape, header_shape),
        ));
    }
    ArrayD::from_shape_vec(IxDyn(shape), values)
        .map_err(|e| CoreError::format(source, e.to_string()))
}

fn first_line(body: &str) -> String {
    body.lines()
        .map(str::trim)
        .find(|l| l.contains("message"))
        .unwrap_or_else(|| body.lines().next().unwrap_or("error response"))
        .to_string()
}
