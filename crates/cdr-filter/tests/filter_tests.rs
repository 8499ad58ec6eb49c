mod common;

use std::time::Duration;

use cdr_docs::{format_cdr_id, Doc, DocError, LegacyOptions, Node, VersionSpec};
use cdr_filter::{FilterCache, FilterConfig, FilterEngine, FilterError, FilterOptions};

use common::{stylesheet, wrapper, Repo, IDENTITY};

const SUMMARY: &str = r#"<Summary xmlns:cdr="cips.nci.nih.gov/cdr" cdr:id="s1"><Title>Lung Cancer</Title><Para n="2">beta</Para><!--note--><Para n="1">alpha</Para></Summary>"#;

fn summary(repo: &Repo) -> (i64, Doc) {
    let id = repo.add_doc("Summary", "Lung Summary", SUMMARY);
    (id, Doc::load(repo.session(), id, VersionSpec::Current))
}

/// Applies an inline stylesheet to the summary and returns the result XML.
fn inline(doc: &Doc, body: &str) -> Result<String, FilterError> {
    let engine = FilterEngine::default();
    let opts = FilterOptions::new().with_filter(stylesheet(body));
    engine.filter(doc, &[], &opts).map(|r| r.xml())
}

fn value_of(select: &str) -> String {
    format!(r#"<xsl:template match="/"><R><xsl:value-of select="{select}"/></R></xsl:template>"#)
}

#[test]
fn test_identity_filter_round_trip() {
    let repo = Repo::new();
    repo.add_filter("Identity", IDENTITY);
    let (_, doc) = summary(&repo);

    let engine = FilterEngine::default();
    let result = engine
        .filter(&doc, &["name:Identity"], &FilterOptions::new())
        .unwrap();
    assert_eq!(result.xml(), SUMMARY);
    assert!(result.messages.is_empty());
}

#[test]
fn test_filters_by_id_name_and_set_apply_in_order() {
    let repo = Repo::new();
    let a = repo.add_filter("Wrap A", &wrapper("A"));
    let b = repo.add_filter("Wrap B", &wrapper("B"));
    let c = repo.add_filter("Wrap C", &wrapper("C"));
    let inner = repo.add_set("Inner Set");
    repo.add_member(inner, 1, Some(c), None);
    let outer = repo.add_set("Outer Set");
    repo.add_member(outer, 2, None, Some(inner));
    repo.add_member(outer, 1, Some(b), None);
    let (_, doc) = summary(&repo);

    let engine = FilterEngine::default();
    let id_ref = format_cdr_id(a);
    let result = engine
        .filter(&doc, &[id_ref.as_str(), "set:Outer Set"], &FilterOptions::new())
        .unwrap();
    let root = result.root().unwrap();
    assert_eq!(root.name, "C");
    assert!(root.find("B/A/Summary/Title").is_some());
}

#[test]
fn test_messages_only() {
    let repo = Repo::new();
    repo.add_filter(
        "Checker",
        r#"<xsl:template match="/"><xsl:for-each select="//Para"><xsl:message>para <xsl:value-of select="@n"/></xsl:message></xsl:for-each><Out/></xsl:template>"#,
    );
    let (_, doc) = summary(&repo);

    let engine = FilterEngine::default();
    let result = engine
        .filter(&doc, &["name:Checker"], &FilterOptions::new().messages_only())
        .unwrap();
    assert!(result.result.is_none());
    assert_eq!(result.messages, vec!["para 2", "para 1"]);
}

#[test]
fn test_parameters_reach_the_stylesheet() {
    let repo = Repo::new();
    let (_, doc) = summary(&repo);
    let engine = FilterEngine::default();
    let opts = FilterOptions::new()
        .with_filter(stylesheet(
            r#"<xsl:param name="audience" select="'Patients'"/><xsl:template match="/"><R><xsl:value-of select="$audience"/></R></xsl:template>"#,
        ))
        .with_parm("audience", "Health professionals");
    let result = engine.filter(&doc, &[], &opts).unwrap();
    assert_eq!(result.xml(), "<R>Health professionals</R>");
}

#[test]
fn test_filter_cache_refetches_stale_filters() {
    let repo = Repo::new();
    let id = repo.add_filter("Cached", r#"<xsl:template match="/"><a/></xsl:template>"#);
    let session = repo.session();

    let stale = FilterCache::new(&FilterConfig::builder().with_shelf_life(Duration::ZERO).build());
    let fresh = FilterCache::new(
        &FilterConfig::builder()
            .with_shelf_life(Duration::from_secs(3600))
            .build(),
    );
    assert!(stale.get_filter(&session, id, None).unwrap().xml.contains("<a/>"));
    assert!(fresh.get_filter(&session, id, None).unwrap().xml.contains("<a/>"));

    repo.set_xml(id, &stylesheet(r#"<xsl:template match="/"><b/></xsl:template>"#));
    std::thread::sleep(Duration::from_millis(5));

    let refetched = stale.get_filter(&session, id, None).unwrap();
    assert!(refetched.xml.contains("<b/>"));
    assert_eq!(stale.len(), 1);
    let cached = fresh.get_filter(&session, id, None).unwrap();
    assert!(cached.xml.contains("<a/>"));
    assert_eq!(fresh.len(), 1);
}

#[test]
fn test_filter_versions() {
    let repo = Repo::new();
    let id = repo.add_filter("Versioned", &wrapper("Current"));
    repo.add_version(id, 1, "2020-01-02 00:00:00", true, &stylesheet(&wrapper("One")));
    repo.add_version(id, 2, "2020-02-02 00:00:00", false, &stylesheet(&wrapper("Two")));
    let (_, doc) = summary(&repo);
    let engine = FilterEngine::default();

    let name = |opts: FilterOptions| {
        engine
            .filter(&doc, &["name:Versioned"], &opts)
            .unwrap()
            .root()
            .unwrap()
            .name
            .clone()
    };
    assert_eq!(name(FilterOptions::new()), "Current");
    assert_eq!(name(FilterOptions::new().with_version(VersionSpec::Last)), "Two");
    assert_eq!(
        name(FilterOptions::new().with_version(VersionSpec::LastPublishable)),
        "One"
    );
    let date = cdr_docs::parse_before_date("2020-02-01").unwrap();
    assert_eq!(name(FilterOptions::new().with_date(date)), "One");
    assert_eq!(
        name(FilterOptions::new().with_version(1).with_date(date)),
        "One"
    );
}

#[test]
fn test_import_by_title_with_spaces() {
    let repo = Repo::new();
    repo.add_filter(
        "Base Rules",
        r#"<xsl:template match="Title"><Heading><xsl:value-of select="."/></Heading></xsl:template>"#,
    );
    repo.add_filter(
        "Main",
        r#"<xsl:import href="cdr:name:Base Rules"/><xsl:template match="/"><Out><xsl:apply-templates select="//Title"/></Out></xsl:template>"#,
    );
    let (_, doc) = summary(&repo);

    let engine = FilterEngine::default();
    let result = engine.filter(&doc, &["name:Main"], &FilterOptions::new()).unwrap();
    assert_eq!(result.xml(), "<Out><Heading>Lung Cancer</Heading></Out>");
}

#[test]
fn test_document_lookups() {
    let repo = Repo::new();
    let other = repo.add_doc("Summary", "Other Summary", "<Summary><Title>Working</Title></Summary>");
    repo.add_version(other, 1, "2020-01-02 00:00:00", true, "<Summary><Title>First</Title></Summary>");
    let (id, doc) = summary(&repo);

    assert_eq!(
        inline(&doc, &value_of("document('cdr:name:Other Summary')/Summary/Title")).unwrap(),
        "<R>Working</R>"
    );
    assert_eq!(
        inline(&doc, &value_of(&format!("document('cdr:{}/1')/Summary/Title", other))).unwrap(),
        "<R>First</R>"
    );
    assert_eq!(
        inline(&doc, &value_of("count(document('cdr:name:Nobody'))")).unwrap(),
        "<R>0</R>"
    );
    assert_eq!(
        inline(&doc, &value_of("document('cdr:*/CdrCtl')/CdrDocCtl/DocTitle")).unwrap(),
        "<R>Lung Summary</R>"
    );
    assert_eq!(
        inline(&doc, &value_of("document('cdr:*/DocTitle')/CdrDocTitle")).unwrap(),
        "<R>Lung Summary</R>"
    );
    assert_eq!(
        inline(&doc, &value_of("name(document('cdrx:/last')/*)")).unwrap(),
        "<R>empty</R>"
    );
    assert_eq!(
        inline(&doc, &value_of("document('cdrutil:/docid')/DocId")).unwrap(),
        format!("<R>{}</R>", format_cdr_id(id))
    );
}

#[test]
fn test_lookup_failures_abort_the_filter() {
    let repo = Repo::new();
    repo.add_doc("Summary", "Dup", "<Summary/>");
    repo.add_doc("Summary", "Dup", "<Summary/>");
    let (_, doc) = summary(&repo);

    let err = inline(&doc, &value_of("document('cdr:name:Dup')")).unwrap_err();
    assert!(matches!(err, FilterError::Doc(DocError::AmbiguousTitle(_))));

    let err = inline(&doc, &value_of("document('cdr:/')")).unwrap_err();
    assert!(matches!(err, FilterError::Doc(DocError::MissingDocumentId)));

    let err = inline(&doc, &value_of("document('cdrutil:/bogus/1')")).unwrap_err();
    assert!(matches!(err, FilterError::UnsupportedResolverFunction { .. }));

    let err = inline(&doc, &value_of("document('ftp://example.com/x')")).unwrap_err();
    assert!(matches!(err, FilterError::UnsupportedUri(_)));
}

#[test]
fn test_utility_functions() {
    let repo = Repo::new();
    let (id, doc) = summary(&repo);
    repo.add_version(id, 1, "2020-01-02 00:00:00", true, SUMMARY);
    repo.add_version(id, 2, "2020-01-03 00:00:00", false, SUMMARY);
    repo.add_zip("208921234");

    assert_eq!(
        inline(&doc, &value_of(&format!("document('cdrutil:/get-pv-num/{}')/PubVerNumber", id)))
            .unwrap(),
        "<R>1</R>"
    );
    assert_eq!(
        inline(&doc, &value_of("document('cdrutil:/valid-zip/208921234')/ValidZip")).unwrap(),
        "<R>20892</R>"
    );
    assert_eq!(
        inline(&doc, &value_of("count(document('cdrutil:/valid-zip/99999')/ValidZip/text())"))
            .unwrap(),
        "<R>0</R>"
    );
    assert_eq!(
        inline(
            &doc,
            r#"<xsl:template match="/"><R><xsl:for-each select="document('cdrutil:/dedup-ids/a~b~~a~c~d')/result/id"><xsl:value-of select="."/>,</xsl:for-each></R></xsl:template>"#
        )
        .unwrap(),
        "<R>c,d,</R>"
    );
}

#[test]
fn test_sql_query_function() {
    let repo = Repo::new();
    let (id, doc) = summary(&repo);

    let result = inline(
        &doc,
        &value_of("document('cdrutil:/sql-query/SELECT id, title FROM document WHERE title = ?~Lung Summary')/SqlResult/row[@id='1']/col[@name='id']"),
    )
    .unwrap();
    assert_eq!(result, format!("<R>{}</R>", id));

    let result = inline(
        &doc,
        &value_of("document('cdrutil:/sql-query/SELECT NULL AS empty_col')/SqlResult/row/col/@null"),
    )
    .unwrap();
    assert_eq!(result, "<R>Y</R>");

    for sql in ["DELETE FROM document", "delete from document", "DeLeTe FROM document"] {
        let err = inline(&doc, &value_of(&format!("document('cdrutil:/sql-query/{}')", sql)))
            .unwrap_err();
        assert!(matches!(err, FilterError::DisallowedSqlKeyword(_)), "{}", sql);
    }
    assert_eq!(
        inline(&doc, &value_of("count(document('cdrutil:/sql-query/SELECT 1')/SqlResult/row)"))
            .unwrap(),
        "<R>1</R>"
    );

    let err = inline(
        &doc,
        &value_of("document('cdrutil:/sql-query/SELECT id FROM document WHERE id = ?')"),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        FilterError::PlaceholderMismatch {
            placeholders: 1,
            values: 0
        }
    ));
}

#[test]
fn test_denormalize_term_function() {
    let repo = Repo::new();
    let parent = repo.add_doc(
        "Term",
        "cancer",
        "<Term><PreferredName>cancer</PreferredName></Term>",
    );
    repo.add_version(parent, 1, "2020-01-02 00:00:00", true, "<Term><PreferredName>cancer</PreferredName></Term>");
    let child_xml = format!(
        r#"<Term xmlns:cdr="cips.nci.nih.gov/cdr"><PreferredName>lung cancer</PreferredName><TermRelationship><ParentTerm><TermId cdr:ref="{}"/></ParentTerm></TermRelationship></Term>"#,
        format_cdr_id(parent)
    );
    let child = repo.add_doc("Term", "lung cancer", &child_xml);
    repo.add_version(child, 1, "2020-01-02 00:00:00", true, &child_xml);
    let (_, doc) = summary(&repo);

    let full = format!("count(document('cdrutil:/denormalizeTerm/{}')/Term/Term)", child);
    assert_eq!(inline(&doc, &value_of(&full)).unwrap(), "<R>1</R>");
    let compact = format!("count(document('cdrutil:/denormalizeTerm/{}/noupcode')/Term/Term)", child);
    assert_eq!(inline(&doc, &value_of(&compact)).unwrap(), "<R>0</R>");
}

#[test]
fn test_reference_errors() {
    let repo = Repo::new();
    let a = repo.add_filter("Wrap A", &wrapper("A"));
    let looped = repo.add_set("Loop");
    repo.add_member(looped, 1, Some(a), None);
    repo.add_member(looped, 2, None, Some(looped));
    let (_, doc) = summary(&repo);
    let engine = FilterEngine::new(FilterConfig::builder().with_max_set_depth(5).build());

    let err = engine.filter(&doc, &["set:Loop"], &FilterOptions::new()).unwrap_err();
    assert!(matches!(err, FilterError::FilterSetDepth(_)));

    let err = engine.filter(&doc, &["set:Missing"], &FilterOptions::new()).unwrap_err();
    assert!(matches!(err, FilterError::FilterSetNotFound(_)));

    let err = engine.filter(&doc, &["name:Missing"], &FilterOptions::new()).unwrap_err();
    assert!(matches!(err, FilterError::FilterNotFound(_)));

    let err = engine.filter(&doc, &[], &FilterOptions::new()).unwrap_err();
    assert!(matches!(err, FilterError::NoFilters));

    let opts = FilterOptions::new().with_filter(stylesheet(IDENTITY));
    let err = engine.filter(&doc, &["name:Wrap A"], &opts).unwrap_err();
    assert!(matches!(err, FilterError::ConflictingFilters));
}

#[test]
fn test_legacy_document_denormalized() {
    let repo = Repo::new();
    let filter = repo.add_filter(
        "Denormalize Summary",
        r#"<xsl:template match="/Summary"><Summary><Title><xsl:value-of select="translate(Title, 'abcdefghijklmnopqrstuvwxyz', 'ABCDEFGHIJKLMNOPQRSTUVWXYZ')"/></Title></Summary></xsl:template>"#,
    );
    let set = repo.add_set("Denormalization Summary Set");
    repo.add_member(set, 1, Some(filter), None);
    let (_, doc) = summary(&repo);
    let engine = FilterEngine::default();

    let legacy = doc
        .legacy_document(LegacyOptions::new().denormalized(&engine))
        .unwrap();
    let xml = legacy.find("CdrDocXml").unwrap();
    assert_eq!(
        xml.children,
        vec![Node::CData("<Summary><Title>LUNG CANCER</Title></Summary>".to_string())]
    );

    // No denormalization set for terms: the XML passes through.
    let term_xml = "<Term><PreferredName>x</PreferredName></Term>";
    let term = repo.add_doc("Term", "x", term_xml);
    let term = Doc::load(repo.session(), term, VersionSpec::Current);
    let legacy = term
        .legacy_document(LegacyOptions::new().denormalized(&engine))
        .unwrap();
    assert_eq!(legacy.find("CdrDocXml").unwrap().text(), term_xml);
}
