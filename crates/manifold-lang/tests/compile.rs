//! End-to-end compilation tests: source goes in, a catalog comes out.

use manifold_lang::environment::{Environment, Settings};
use manifold_lang::logging::{Level, MemorySink};
use manifold_lang::{Catalog, CompilationError, Facts, Logger, Node};
use std::fs;
use std::sync::Arc;

#[derive(Debug)]
struct Harness {
    _dir: tempfile::TempDir,
    pub sink: MemorySink,
    pub catalog: Catalog,
}

fn try_compile_for(node_name: &str, source: &str) -> Result<Harness, CompilationError> {
    let dir = tempfile::tempdir().expect("temp dir");
    fs::create_dir_all(dir.path().join("manifests")).expect("manifest dir");
    fs::write(dir.path().join("manifests/site.pp"), source).expect("site.pp");

    let sink = MemorySink::new();
    let logger = Logger::new(sink.clone());
    let environment = Environment::create(dir.path(), Settings::default(), &logger, None)?;
    let mut facts = Facts::new();
    facts.set("hostname", manifold_lang::value::Value::string(node_name));
    let node = Node::new(logger, Some(node_name), environment, Arc::new(facts))?;
    let catalog = node.compile(&[])?;
    Ok(Harness {
        _dir: dir,
        sink,
        catalog,
    })
}

fn try_compile(source: &str) -> Result<Harness, CompilationError> {
    try_compile_for("test.example.com", source)
}

fn compile(source: &str) -> Harness {
    try_compile(source).unwrap_or_else(|e| panic!("compilation failed: {}", e.to_diagnostic()))
}

fn resource<'a>(catalog: &'a Catalog, type_name: &str, title: &str) -> &'a manifold_lang::catalog::Resource {
    let index = catalog
        .find(type_name, title)
        .unwrap_or_else(|| panic!("expected {}[{}] in the catalog", type_name, title));
    catalog.get(index)
}

fn parameter(catalog: &Catalog, type_name: &str, title: &str, name: &str) -> String {
    resource(catalog, type_name, title)
        .get(name)
        .unwrap_or_else(|| panic!("expected attribute '{}' on {}[{}]", name, type_name, title))
        .value
        .to_string()
}

#[test]
fn include_declares_class_and_logs_notice() {
    let harness = compile("class foo { notice 'hi' }\ninclude foo");
    for (type_name, title) in [
        ("stage", "main"),
        ("class", "main"),
        ("class", "settings"),
        ("class", "foo"),
    ] {
        assert!(
            harness.catalog.find(type_name, title).is_some(),
            "expected {}[{}]",
            type_name,
            title
        );
    }
    assert_eq!(harness.sink.messages(Level::Notice), vec!["hi".to_string()]);

    // Class[foo] is contained in a stage.
    let json = harness.catalog.to_json();
    let edges = json["edges"].as_array().unwrap();
    assert!(edges.iter().any(|edge| {
        edge["relationship"] == "contains"
            && edge["source"] == "Stage[main]"
            && edge["target"] == "Class[foo]"
    }));
}

#[test]
fn include_is_idempotent() {
    let harness = compile("class foo { notice 'once' }\ninclude foo\ninclude foo");
    assert_eq!(harness.sink.messages(Level::Notice).len(), 1);
}

#[test]
fn collector_realizes_virtual_resource() {
    let harness = compile("@file { '/tmp/x': ensure => file }\nFile <| |>");
    let file = resource(&harness.catalog, "file", "/tmp/x");
    assert!(!file.is_virtual());
    assert_eq!(parameter(&harness.catalog, "file", "/tmp/x", "ensure"), "file");
    let json = harness.catalog.to_json();
    assert!(json["resources"]
        .as_array()
        .unwrap()
        .iter()
        .any(|r| r["type"] == "File" && r["title"] == "/tmp/x"));
}

#[test]
fn uncollected_virtual_resource_stays_out() {
    let harness = compile("@file { '/tmp/hidden': ensure => file }");
    let file = resource(&harness.catalog, "file", "/tmp/hidden");
    assert!(file.is_virtual());
    let json = harness.catalog.to_json();
    assert!(!json["resources"]
        .as_array()
        .unwrap()
        .iter()
        .any(|r| r["title"] == "/tmp/hidden"));
}

#[test]
fn collector_query_filters() {
    let harness = compile(
        "@file { '/a': mode => '0600' }\n@file { '/b': mode => '0644' }\nFile <| mode == '0600' |>",
    );
    assert!(!resource(&harness.catalog, "file", "/a").is_virtual());
    assert!(resource(&harness.catalog, "file", "/b").is_virtual());
}

#[test]
fn inherited_scope_defaults_apply_to_parent_resources() {
    let source = r#"
class a ($x = 1) {
  file { '/tmp/in-a': ensure => file }
}
class b inherits a {
  File { mode => '0600' }
  file { '/tmp/in-b': ensure => file }
}
include b
"#;
    let harness = compile(source);
    // Declaring b declares a.
    assert!(harness.catalog.find("class", "a").is_some());
    // The default applies to the resource declared in b.
    assert_eq!(parameter(&harness.catalog, "file", "/tmp/in-b", "mode"), "0600");
    // The resource in a was declared before b's default existed; it is in
    // the catalog without the default.
    assert!(harness.catalog.find("file", "/tmp/in-a").is_some());
}

#[test]
fn heredoc_with_escapes() {
    let source = "$s = @(\"TAG\"/tn)\n\\tindented\nTAG\nnotify { 'out': message => $s }";
    let harness = compile(source);
    assert_eq!(
        parameter(&harness.catalog, "notify", "out", "message"),
        "\tindented\n"
    );
}

#[test]
fn slash_disambiguation_divides() {
    let harness = compile("$a = 1 / 2 / 3\nnotify { 'out': message => \"${a}\" }");
    assert_eq!(parameter(&harness.catalog, "notify", "out", "message"), "0");
}

#[test]
fn regex_match_sets_captures() {
    let source = r#"
$x = 'version-42'
if $x =~ /version-(\d+)/ {
  notify { 'out': message => $1 }
}
"#;
    let harness = compile(source);
    assert_eq!(parameter(&harness.catalog, "notify", "out", "message"), "42");
}

#[test]
fn type_inference_modes() {
    let source = r#"
notice type([1, 2.0, 'x'], 'generalized')
notice type([1, 2.0, 'x'])
"#;
    let harness = compile(source);
    let notices = harness.sink.messages(Level::Notice);
    assert_eq!(notices[0], "Array[Scalar, 3, 3]");
    assert_eq!(
        notices[1],
        "Tuple[Integer[1, 1], Float[2.0, 2.0], String[1, 1]]"
    );
}

#[test]
fn defined_types_expand_at_finalization() {
    let source = r#"
define webapp::instance($port, $ensure = running) {
  notify { "app-${title}": message => "port ${port} is ${ensure}" }
}
webapp::instance { 'store': port => 8080 }
"#;
    let harness = compile(source);
    assert_eq!(
        parameter(&harness.catalog, "notify", "app-store", "message"),
        "port 8080 is running"
    );
    // The instance resource itself is in the catalog with its parameters.
    assert_eq!(
        parameter(&harness.catalog, "webapp::instance", "store", "port"),
        "8080"
    );
    // The notify is contained in the instance.
    let instance = harness.catalog.find("webapp::instance", "store").unwrap();
    let inner = resource(&harness.catalog, "notify", "app-store");
    assert_eq!(inner.container(), Some(instance));
}

#[test]
fn virtual_defined_type_waits_for_collection() {
    let source = r#"
define widget($size) {
  notify { "made-${title}": message => "size ${size}" }
}
@widget { 'w1': size => 'large' }
Widget <| |>
"#;
    let harness = compile(source);
    assert_eq!(
        parameter(&harness.catalog, "notify", "made-w1", "message"),
        "size large"
    );
}

#[test]
fn relationship_operators_create_edges() {
    let source = r#"
file { '/a': ensure => file }
file { '/b': ensure => file }
service { 'svc': }
File['/a'] -> File['/b'] ~> Service['svc']
"#;
    let harness = compile(source);
    let json = harness.catalog.to_json();
    let edges = json["edges"].as_array().unwrap();
    assert!(edges.iter().any(|edge| {
        edge["relationship"] == "before"
            && edge["source"] == "File[/a]"
            && edge["target"] == "File[/b]"
    }));
    assert!(edges.iter().any(|edge| {
        edge["relationship"] == "notify"
            && edge["source"] == "File[/b]"
            && edge["target"] == "Service[svc]"
    }));
}

#[test]
fn metaparameters_become_edges() {
    let source = r#"
file { '/conf': ensure => file }
service { 'svc': require => File['/conf'], notify => File['/conf'] }
"#;
    let harness = compile(source);
    let json = harness.catalog.to_json();
    let edges = json["edges"].as_array().unwrap();
    assert!(edges.iter().any(|edge| {
        edge["relationship"] == "require"
            && edge["source"] == "File[/conf]"
            && edge["target"] == "Service[svc]"
    }));
    assert!(edges.iter().any(|edge| {
        edge["relationship"] == "notify"
            && edge["source"] == "Service[svc]"
            && edge["target"] == "File[/conf]"
    }));
}

#[test]
fn override_pending_until_declared() {
    let source = r#"
File['/later'] { mode => '0700' }
file { '/later': ensure => file }
"#;
    let harness = compile(source);
    assert_eq!(parameter(&harness.catalog, "file", "/later", "mode"), "0700");
}

#[test]
fn unresolved_overrides_are_dropped_silently() {
    let harness = compile("File['/never-declared'] { mode => '0700' }");
    assert!(harness.catalog.find("file", "/never-declared").is_none());
}

#[test]
fn duplicate_resource_declaration_fails() {
    let error = try_compile("file { '/x': }\nfile { '/x': }").expect_err("duplicate");
    assert!(error.message.contains("previously declared"));
}

#[test]
fn duplicate_attribute_fails() {
    let error =
        try_compile("file { '/x': mode => '0600', mode => '0700' }").expect_err("duplicate");
    assert!(error.message.contains("already exists"));
}

#[test]
fn unknown_resource_type_fails() {
    let error = try_compile("frobnicator { 'x': }").expect_err("unknown type");
    assert!(error.message.contains("unknown resource type"));
}

#[test]
fn unknown_class_fails() {
    let error = try_compile("include nonexistent").expect_err("unknown class");
    assert!(error.message.contains("has not been defined"));
}

#[test]
fn fail_function_aborts_compilation() {
    let error = try_compile("fail 'boom'").expect_err("fail should abort");
    assert!(error.message.contains("boom"));
}

#[test]
fn case_selector_and_conditionals() {
    let source = r#"
$os = 'linux'
$kind = $os ? { /lin/ => 'nix', default => 'other' }
case $kind {
  'nix': { $pkg = 'openssh' }
  default: { $pkg = 'putty' }
}
unless $pkg == 'putty' {
  notify { 'pick': message => "${pkg} on ${kind}" }
}
"#;
    let harness = compile(source);
    assert_eq!(
        parameter(&harness.catalog, "notify", "pick", "message"),
        "openssh on nix"
    );
}

#[test]
fn iteration_functions() {
    let source = r#"
$doubled = [1, 2, 3].map |$n| { $n * 2 }
$sum = $doubled.reduce |$memo, $n| { $memo + $n }
[1, 2].each |$i, $v| { notice "${i}=${v}" }
notify { 'sum': message => "${sum}" }
"#;
    let harness = compile(source);
    assert_eq!(parameter(&harness.catalog, "notify", "sum", "message"), "12");
    assert_eq!(
        harness.sink.messages(Level::Notice),
        vec!["0=1".to_string(), "1=2".to_string()]
    );
}

#[test]
fn hash_iteration_and_filter() {
    let source = r#"
$services = { 'web' => true, 'db' => false }
$enabled = $services.filter |$name, $on| { $on }
$enabled.each |$name, $on| { notify { "svc-${name}": } }
"#;
    let harness = compile(source);
    assert!(harness.catalog.find("notify", "svc-web").is_some());
    assert!(harness.catalog.find("notify", "svc-db").is_none());
}

#[test]
fn sprintf_and_split() {
    let source = r#"
$parts = split('a,b,c', ',')
notify { 'out': message => sprintf('%d parts, first %s', 3, $parts[0]) }
"#;
    let harness = compile(source);
    assert_eq!(
        parameter(&harness.catalog, "notify", "out", "message"),
        "3 parts, first a"
    );
}

#[test]
fn node_definitions_match_most_specific() {
    let source = r#"
node 'web01.example.com' { notify { 'exact': } }
node /^web/ { notify { 'regex': } }
node default { notify { 'fallback': } }
"#;
    let harness = try_compile_for("web01.example.com", source).unwrap();
    assert!(harness.catalog.find("notify", "exact").is_some());
    assert!(harness.catalog.find("notify", "regex").is_none());

    let harness = try_compile_for("web02.example.com", source).unwrap();
    assert!(harness.catalog.find("notify", "regex").is_some());

    let harness = try_compile_for("db01", source).unwrap();
    assert!(harness.catalog.find("notify", "fallback").is_some());
}

#[test]
fn missing_node_definition_fails() {
    let error = try_compile_for("db01", "node 'web01' { }").expect_err("no match");
    assert!(error.message.contains("could not find a default node definition"));
}

#[test]
fn class_parameters_type_checked() {
    let source = r#"
class limits(Integer[0, 10] $max) { }
class { 'limits': max => 99 }
"#;
    let error = try_compile(source).expect_err("type check");
    assert!(error.message.contains("parameter $max expects Integer[0, 10]"));
}

#[test]
fn class_parameter_defaults_and_attributes() {
    let source = r#"
class listen($port = 80, $bind = '0.0.0.0') {
  notify { 'listening': message => "${bind}:${port}" }
}
class { 'listen': port => 8080 }
"#;
    let harness = compile(source);
    assert_eq!(
        parameter(&harness.catalog, "notify", "listening", "message"),
        "0.0.0.0:8080"
    );
    assert_eq!(parameter(&harness.catalog, "class", "listen", "port"), "8080");
}

#[test]
fn invalid_class_parameter_rejected() {
    let source = "class c($a) { }\nclass { 'c': a => 1, nope => 2 }";
    let error = try_compile(source).expect_err("invalid parameter");
    assert!(error.message.contains("not a valid parameter"));
}

#[test]
fn type_aliases_resolve_and_check() {
    let source = r#"
type Port = Integer[0, 65535]
$p = 8080
if $p =~ Port {
  notify { 'ok': message => 'valid port' }
}
"#;
    let harness = compile(source);
    assert!(harness.catalog.find("notify", "ok").is_some());
}

#[test]
fn recursive_type_alias_terminates() {
    let source = r#"
type Tree = Variant[Integer, Array[Tree]]
$value = [1, [2, [3]]]
if $value =~ Tree {
  notify { 'matched': }
}
"#;
    let harness = compile(source);
    assert!(harness.catalog.find("notify", "matched").is_some());
}

#[test]
fn language_functions_evaluate() {
    let source = r#"
function double($x) { $x * 2 }
notify { 'out': message => "${double(21)}" }
"#;
    let harness = compile(source);
    assert_eq!(parameter(&harness.catalog, "notify", "out", "message"), "42");
}

#[test]
fn facts_are_visible_in_top_scope() {
    let harness = compile("notify { 'host': message => \"${hostname} / ${facts['hostname']}\" }");
    assert_eq!(
        parameter(&harness.catalog, "notify", "host", "message"),
        "test.example.com / test.example.com"
    );
}

#[test]
fn variable_reassignment_fails() {
    let error = try_compile("$a = 1\n$a = 2").expect_err("reassignment");
    assert!(error.message.contains("previously assigned"));
    assert!(error.path.contains("site.pp"));
    assert_eq!(error.line, 2);
}

#[test]
fn every_resource_identity_is_unique() {
    let harness = compile(
        "file { ['/a', '/b', '/c']: ensure => file }\nnotify { 'x': }",
    );
    let mut seen = std::collections::HashSet::new();
    for (_, resource) in harness.catalog.resources() {
        assert!(
            seen.insert((resource.type_name().to_string(), resource.title().to_string())),
            "duplicate identity {}[{}]",
            resource.type_name(),
            resource.title()
        );
    }
    assert!(harness.catalog.find("file", "/b").is_some());
}

#[test]
fn catalog_json_shape() {
    let harness = compile("file { '/etc/app.conf': ensure => file, mode => '0644' }");
    let json = harness.catalog.to_json();
    assert_eq!(json["name"], "test.example.com");
    assert_eq!(json["environment"], "production");
    assert!(json["version"].is_number());
    let resources = json["resources"].as_array().unwrap();
    let file = resources
        .iter()
        .find(|r| r["type"] == "File")
        .expect("file resource serialized");
    assert_eq!(file["title"], "/etc/app.conf");
    assert_eq!(file["parameters"]["mode"], "0644");
    assert!(file["line"].is_number());
    assert!(file["file"].as_str().unwrap().contains("site.pp"));
}

#[test]
fn realize_function_realizes() {
    let harness = compile("@user { 'alice': }\nrealize(User['alice'])");
    assert!(!resource(&harness.catalog, "user", "alice").is_virtual());
}

#[test]
fn realize_of_missing_resource_fails() {
    let error = try_compile("realize(User['ghost'])").expect_err("uncollected");
    assert!(error.message.contains("cannot realize resource User[ghost]"));
}

#[test]
fn exported_resources_need_double_collector() {
    let source = "@@host { 'db': ip => '10.0.0.5' }\nHost <| |>";
    let harness = compile(source);
    assert!(resource(&harness.catalog, "host", "db").is_virtual());

    let source = "@@host { 'db': ip => '10.0.0.5' }\nHost <<| |>>";
    let harness = compile(source);
    assert!(!resource(&harness.catalog, "host", "db").is_virtual());
}

#[test]
fn interpolated_expression_blocks() {
    let harness = compile("notify { 'calc': message => \"result: ${ 6 * 7 }\" }");
    assert_eq!(
        parameter(&harness.catalog, "notify", "calc", "message"),
        "result: 42"
    );
}

#[test]
fn array_and_hash_access() {
    let source = r#"
$list = ['zero', 'one', 'two']
$map = { 'a' => 1, 'b' => 2 }
notify { 'out': message => "${list[1]} ${list[-1]} ${map['b']}" }
"#;
    let harness = compile(source);
    assert_eq!(
        parameter(&harness.catalog, "notify", "out", "message"),
        "one two 2"
    );
}

#[test]
fn schema_validates_parameter_names_and_values() {
    let error = try_compile("file { '/x': colour => 'red' }").expect_err("unknown parameter");
    assert!(error.message.contains("does not have a parameter named 'colour'"));

    let error = try_compile("service { 's': ensure => 'sideways' }").expect_err("bad value");
    assert!(error.message.contains("invalid value 'sideways'"));
}

#[test]
fn warnings_do_not_abort() {
    let harness = compile("$x = 'a\\d'\nnotify { 'n': message => $x }");
    let warnings = harness.sink.messages(Level::Warning);
    assert!(warnings.iter().any(|w| w.contains("unexpected escape sequence")));
    assert!(harness.catalog.find("notify", "n").is_some());
}
