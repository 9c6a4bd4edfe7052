//! Built-in rule table. Order is priority: narrower rules come before the
//! broader ones that would otherwise shadow them.

use super::{CaptureShape, CaptureSpec, RuleDefinition};

const PORTFOLIO: &[CaptureSpec] = &[CaptureSpec::required("portfolio", CaptureShape::PortfolioName)];

pub const BUILTIN_RULES: &[RuleDefinition] = &[
    RuleDefinition {
        id: "trades_for_portfolio",
        description: "Trade count and totals for one portfolio",
        example: "How many trades for portfolio Garfield?",
        triggers: &[
            r"(?:how many|count|number of)\b.*\btrades\b.*\b(?:for|in) portfolio (?P<portfolio>.+)$",
            r"(?:how many|count|number of)\b.*\btrades\b.*\b(?:for|in) (?P<portfolio>.+?) portfolio$",
        ],
        sql: r"
SELECT PortfolioName,
       COUNT(DISTINCT id) AS NumTrades,
       SUM(AllocationQTY) AS TotalQty,
       SUM(ABS(AllocationCash)) AS TotalValue
FROM trades
WHERE PortfolioName = '{portfolio}'
GROUP BY PortfolioName",
        captures: PORTFOLIO,
    },
    RuleDefinition {
        id: "trades_by_security_type",
        description: "Count trades grouped by security type",
        example: "How many trades by security type?",
        triggers: &[
            r"(?:how many|count|number of)\b.*\btrades\b.*\b(?:by|per) (?:security type|asset class|type)$",
            r"\btrades (?:by|per) (?:security type|asset class)\b",
        ],
        sql: r"
SELECT SecurityType,
       COUNT(DISTINCT id) AS NumTrades,
       SUM(ABS(AllocationCash)) AS TotalValue
FROM trades
GROUP BY SecurityType
ORDER BY NumTrades DESC",
        captures: &[],
    },
    RuleDefinition {
        id: "count_trades_by_portfolio",
        description: "Count trades grouped by portfolio",
        example: "How many trades per portfolio?",
        triggers: &[
            r"how many trades.*portfolio",
            r"count.*trades.*by.*portfolio",
            r"trades.*per.*portfolio",
            r"number of trades.*portfolio",
        ],
        sql: r"
SELECT PortfolioName,
       COUNT(DISTINCT id) AS NumTrades,
       SUM(AllocationQTY) AS TotalQty,
       SUM(ABS(AllocationCash)) AS TotalValue
FROM trades
GROUP BY PortfolioName
ORDER BY NumTrades DESC",
        captures: &[],
    },
    RuleDefinition {
        id: "top_holdings_by_mv",
        description: "Top holdings by market value",
        example: "Top 10 holdings by market value",
        triggers: &[
            r"\btop (?P<limit>\d+) (?:holdings|positions)\b",
            r"\b(?P<limit>\d+) (?:largest|biggest) (?:holdings|positions)\b",
            r"\btop (?:holdings|positions)\b",
            r"\b(?:largest|biggest) (?:holdings|positions)\b",
            r"\bholdings\b.*\bby (?:market value|mv)\b",
        ],
        sql: r"
SELECT PortfolioName, SecurityId, SecName, Qty, MV_Base
FROM holdings
ORDER BY MV_Base DESC
LIMIT {limit}",
        captures: &[CaptureSpec::with_default("limit", CaptureShape::RowCount, "10")],
    },
    RuleDefinition {
        id: "pnl_by_security_type",
        description: "P&L summary by security type",
        example: "P&L by security type",
        triggers: &[
            r"\b(?:p&?l|pnl|profit|performance)\b.*\b(?:by|per) (?:security type|asset class|type)$",
        ],
        sql: r"
SELECT SecurityTypeName,
       SUM(PL_YTD) AS YTD_PL,
       SUM(PL_MTD) AS MTD_PL,
       SUM(PL_DTD) AS OneDayPL,
       COUNT(*) AS NumPositions
FROM holdings
GROUP BY SecurityTypeName
ORDER BY YTD_PL DESC",
        captures: &[],
    },
    RuleDefinition {
        id: "pnl_by_portfolio",
        description: "P&L summary by portfolio",
        example: "What's the P&L by portfolio?",
        triggers: &[
            r"\bp&?l\b.*\bby\b.*portfolio",
            r"\bpnl\b.*portfolio",
            r"profit.*loss.*portfolio",
            r"\bytd\b.*portfolio",
            r"performance.*portfolio",
        ],
        sql: r"
SELECT PortfolioName,
       SUM(PL_YTD) AS YTD_PL,
       SUM(PL_MTD) AS MTD_PL,
       SUM(PL_DTD) AS OneDayPL,
       SUM(MV_Base) AS CurrentMV
FROM holdings
GROUP BY PortfolioName
ORDER BY YTD_PL DESC",
        captures: &[],
    },
    RuleDefinition {
        id: "net_traded_qty_by_security",
        description: "Net traded quantity by security (buys minus sells)",
        example: "Net traded quantity by security",
        triggers: &[
            r"net.*trad(?:ed|ing).*(?:quantity|qty)",
            r"net.*position.*from.*trades",
            r"buy.*sell.*by.*security",
        ],
        sql: r"
SELECT SecurityId, Name, SecurityType,
       SUM(CASE WHEN TradeTypeName = 'Buy' THEN AllocationQTY
                WHEN TradeTypeName = 'Sell' THEN -AllocationQTY
                ELSE 0 END) AS NetQty,
       COUNT(DISTINCT id) AS NumTrades
FROM trades
GROUP BY SecurityId, Name, SecurityType
ORDER BY ABS(NetQty) DESC
LIMIT {limit}",
        captures: &[CaptureSpec::with_default("limit", CaptureShape::RowCount, "20")],
    },
    RuleDefinition {
        id: "portfolio_summary",
        description: "Portfolio summary with counts and totals",
        example: "Portfolio summary",
        triggers: &[
            r"portfolio.*summary",
            r"overview.*portfolio",
            r"portfolio.*total",
            r"summar(?:y|ize).*portfolios",
        ],
        sql: r"
SELECT PortfolioName,
       COUNT(DISTINCT SecurityId) AS NumSecurities,
       COUNT(*) AS NumPositions,
       SUM(MV_Base) AS TotalMV,
       SUM(PL_YTD) AS YTD_PL
FROM holdings
GROUP BY PortfolioName
ORDER BY TotalMV DESC",
        captures: &[],
    },
    RuleDefinition {
        id: "trades_for_security",
        description: "Trades for a specific security",
        example: "Show trades for security 273482",
        triggers: &[
            r"trades.*\bfor (?:security|stock|bond)(?: id)? (?P<security_id>\d+)\b",
            r"trading activity.*\b(?:security|stock)(?: id)? (?P<security_id>\d+)\b",
            r"trades.*\bsecurity(?: id)? (?P<security_id>\d+)\b",
        ],
        sql: r"
SELECT id, TradeTypeName, PortfolioName, AllocationQTY,
       Price, AllocationCash, Counterparty
FROM trades
WHERE SecurityId = {security_id}
ORDER BY id DESC
LIMIT {limit}",
        captures: &[
            CaptureSpec::required("security_id", CaptureShape::NumericId),
            CaptureSpec::with_default("limit", CaptureShape::RowCount, "50"),
        ],
    },
    RuleDefinition {
        id: "holdings_for_portfolio",
        description: "Holdings for a specific portfolio",
        example: "Show holdings for Garfield",
        triggers: &[
            r"\bholdings (?:for|in|of) (?:portfolio )?(?P<portfolio>.+?)(?: portfolio)?$",
            r"\bwhat does (?:portfolio )?(?P<portfolio>.+?)(?: portfolio)? (?:hold|own)$",
            r"\bpositions (?:for|in|of) (?:portfolio )?(?P<portfolio>.+?)(?: portfolio)?$",
        ],
        sql: r"
SELECT SecurityId, SecName, SecurityTypeName,
       Qty,
       MV_Base,
       PL_YTD AS YTD_PL
FROM holdings
WHERE PortfolioName = '{portfolio}'
ORDER BY MV_Base DESC",
        captures: PORTFOLIO,
    },
    RuleDefinition {
        id: "largest_trades",
        description: "Largest trades by principal amount",
        example: "Largest 20 trades",
        triggers: &[
            r"\b(?:largest|biggest) (?P<limit>\d+) trades\b",
            r"\b(?P<limit>\d+) (?:largest|biggest) trades\b",
            r"\btop (?P<limit>\d+) trades\b",
            r"\b(?:largest|biggest) trades\b",
            r"\btop trades by (?:size|value|principal)\b",
        ],
        sql: r"
SELECT id, TradeTypeName, Name, SecurityType,
       Quantity, Price, Principal, TotalCash, PortfolioName
FROM trades
ORDER BY ABS(Principal) DESC
LIMIT {limit}",
        captures: &[CaptureSpec::with_default("limit", CaptureShape::RowCount, "20")],
    },
    RuleDefinition {
        id: "unique_securities",
        description: "Count unique securities by type",
        example: "How many unique securities are there?",
        triggers: &[
            r"how many.*(?:unique|different|distinct) securities",
            r"count.*securities",
            r"number of.*securities",
        ],
        sql: r"
SELECT SecurityTypeName,
       COUNT(DISTINCT SecurityId) AS UniqueSecurities,
       COUNT(DISTINCT CASE WHEN CloseDate IS NULL THEN SecurityId ELSE NULL END) AS OpenSecurities
FROM holdings
GROUP BY SecurityTypeName
ORDER BY UniqueSecurities DESC",
        captures: &[],
    },
    RuleDefinition {
        id: "allocation_summary",
        description: "Summary of allocation rules used",
        example: "Allocation summary",
        triggers: &[
            r"allocation.*(?:summary|rules)",
            r"how.*trades.*allocated",
            r"allocation.*methods",
        ],
        sql: r"
SELECT AllocationRule,
       COUNT(*) AS NumAllocations,
       SUM(ABS(AllocationCash)) AS TotalValue,
       SUM(CASE WHEN IsCustomAllocation = 1 THEN 1 ELSE 0 END) AS CustomCount
FROM trades
GROUP BY AllocationRule
ORDER BY TotalValue DESC",
        captures: &[],
    },
];
