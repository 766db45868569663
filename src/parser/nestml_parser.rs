#![allow(clippy::empty_docs)]
#[derive(Parser)]
#[grammar = "parser/nestml_grammar.pest"] // relative to src
pub struct NestmlParser;

use pest::error::Error;
use pest::iterators::{Pair, Pairs};
use pest::Parser;
use std::boxed::Box;

use crate::ast::{
    AssignOp, BinaryOp, Block, BodyElement, BufferKind, DataType, DataTypeKind, Declaration,
    EquationItem, EquationsBlock, Expr, ExprKind, FunctionDef, InputBlock, InputPort,
    InputQualifier, Model, OdeEquation, OutputBlock, Param, ShapeDecl, Stmt, StmtKind,
    StringSpan, UnaryOp, UnitExpr, UpdateBlock, VarBlock, VarBlockKind, VariableName,
    VariableRef,
};

fn span_of(pair: &Pair<Rule>) -> Option<StringSpan> {
    Some(StringSpan {
        pos_start: pair.as_span().start(),
        pos_end: pair.as_span().end(),
    })
}

fn join_spans(lhs: &Expr, rhs: &Expr) -> Option<StringSpan> {
    match (lhs.span, rhs.span) {
        (Some(l), Some(r)) => Some(l.join(r)),
        (l, r) => l.or(r),
    }
}

// name  = @{ !keyword ~ (ASCII_ALPHA | "_") ~ ident_char* }
fn parse_name(pair: Pair<Rule>) -> String {
    pair.as_str().to_string()
}

// variable_name = ${ name ~ prime* }
fn parse_variable_name(pair: Pair<Rule>) -> VariableName {
    let span = span_of(&pair);
    let mut inner = pair.into_inner();
    let name = parse_name(inner.next().unwrap());
    let order = inner.filter(|p| p.as_rule() == Rule::prime).count() as u32;
    VariableName { name, order, span }
}

// number     = @{ ... }
fn parse_number(pair: Pair<Rule>) -> Expr {
    let text = pair.as_str();
    let is_integer = !text.contains(['.', 'e', 'E']);
    Expr::new(
        ExprKind::Number {
            value: text.parse().unwrap(),
            is_integer,
        },
        span_of(&pair),
    )
}

// fold `head (op operand)*` into a left-associative binary tree
fn parse_left_assoc(pair: Pair<Rule>, op_of: fn(&str) -> BinaryOp) -> Expr {
    let mut inner = pair.into_inner();
    let mut head = parse_expression(inner.next().unwrap());
    while let Some(op) = inner.next() {
        let rhs = parse_expression(inner.next().unwrap());
        let span = join_spans(&head, &rhs);
        head = Expr::new(
            ExprKind::Binary {
                op: op_of(op.as_str()),
                lhs: Box::new(head),
                rhs: Box::new(rhs),
            },
            span,
        );
    }
    head
}

fn parse_expression(pair: Pair<Rule>) -> Expr {
    let span = span_of(&pair);
    match pair.as_rule() {
        // expression  =  { logical_or ~ ("?" ~ expression ~ ":" ~ expression)? }
        Rule::expression => {
            let mut inner = pair.into_inner();
            let cond = parse_expression(inner.next().unwrap());
            match inner.next() {
                Some(then) => {
                    let then = parse_expression(then);
                    let otherwise = parse_expression(inner.next().unwrap());
                    Expr::new(
                        ExprKind::Ternary {
                            cond: Box::new(cond),
                            then: Box::new(then),
                            otherwise: Box::new(otherwise),
                        },
                        span,
                    )
                }
                None => cond,
            }
        }

        // logical_or  =  { logical_and ~ (or_op ~ logical_and)* }
        Rule::logical_or => parse_left_assoc(pair, |_| BinaryOp::Or),

        // logical_and =  { logical_not ~ (and_op ~ logical_not)* }
        Rule::logical_and => parse_left_assoc(pair, |_| BinaryOp::And),

        // logical_not =  { not_op* ~ comparison }
        Rule::logical_not => {
            let pairs: Vec<_> = pair.into_inner().collect();
            let (nots, rest) = pairs.split_at(pairs.len() - 1);
            let mut expr = parse_expression(rest[0].clone());
            for _ in nots {
                expr = Expr::new(
                    ExprKind::Unary {
                        op: UnaryOp::Not,
                        operand: Box::new(expr),
                    },
                    span,
                );
            }
            expr
        }

        // comparison  =  { sum ~ (comp_op ~ sum)? }
        Rule::comparison => parse_left_assoc(pair, |op| match op {
            "<" => BinaryOp::Lt,
            "<=" => BinaryOp::Le,
            ">" => BinaryOp::Gt,
            ">=" => BinaryOp::Ge,
            "==" => BinaryOp::Eq,
            "!=" | "<>" => BinaryOp::Ne,
            _ => unreachable!("{}", op),
        }),

        // sum         =  { term ~ (sum_op ~ term)* }
        Rule::sum => parse_left_assoc(pair, |op| match op {
            "+" => BinaryOp::Add,
            _ => BinaryOp::Sub,
        }),

        // term        =  { unary ~ (term_op ~ unary)* }
        Rule::term => parse_left_assoc(pair, |op| match op {
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            _ => BinaryOp::Mod,
        }),

        // unary       =  { unary_op* ~ power }
        Rule::unary => {
            let pairs: Vec<_> = pair.into_inner().collect();
            let (ops, rest) = pairs.split_at(pairs.len() - 1);
            let mut expr = parse_expression(rest[0].clone());
            for op in ops.iter().rev() {
                let op = if op.as_str() == "-" {
                    UnaryOp::Neg
                } else {
                    UnaryOp::Plus
                };
                expr = Expr::new(
                    ExprKind::Unary {
                        op,
                        operand: Box::new(expr),
                    },
                    span,
                );
            }
            expr
        }

        // power       =  { atom ~ ("**" ~ unary)? }
        Rule::power => {
            let mut inner = pair.into_inner();
            let base = parse_expression(inner.next().unwrap());
            match inner.next() {
                Some(exponent) => Expr::new(
                    ExprKind::Binary {
                        op: BinaryOp::Pow,
                        lhs: Box::new(base),
                        rhs: Box::new(parse_expression(exponent)),
                    },
                    span,
                ),
                None => base,
            }
        }

        // unit_literal = ${ number ~ inline_ws* ~ name ~ ... }
        Rule::unit_literal => {
            let mut inner = pair.into_inner();
            let number = parse_number(inner.next().unwrap());
            let unit = inner.next().unwrap();
            let unit = Expr::new(
                ExprKind::Variable(VariableRef::new(unit.as_str(), 0)),
                span_of(&unit),
            );
            Expr::new(
                ExprKind::Binary {
                    op: BinaryOp::Mul,
                    lhs: Box::new(number),
                    rhs: Box::new(unit),
                },
                span,
            )
        }

        Rule::number => parse_number(pair),

        // boolean    = @{ ("true" | "false" | "True" | "False") ~ !ident_char }
        Rule::boolean => Expr::new(
            ExprKind::Boolean(pair.as_str().eq_ignore_ascii_case("true")),
            span,
        ),

        // inf_lit    = @{ "inf" ~ !ident_char }
        Rule::inf_lit => Expr::new(
            ExprKind::Number {
                value: f64::INFINITY,
                is_integer: false,
            },
            span,
        ),

        // string     = ${ "\"" ~ string_inner ~ "\"" }
        Rule::string => Expr::new(
            ExprKind::String(pair.into_inner().next().unwrap().as_str().to_string()),
            span,
        ),

        // call        =  { name ~ "(" ~ (expression ~ ("," ~ expression)*)? ~ ")" }
        Rule::call => {
            let mut inner = pair.into_inner();
            let name = parse_name(inner.next().unwrap());
            Expr::new(
                ExprKind::Call {
                    name,
                    args: inner.map(parse_expression).collect(),
                },
                span,
            )
        }

        // variable    =  { variable_name ~ index? }
        Rule::variable => Expr::new(ExprKind::Variable(parse_variable_ref(pair)), span),

        _ => unreachable!("{:?}", pair.to_string()),
    }
}

// variable    =  { variable_name ~ index? }
// index       =  { "[" ~ expression ~ "]" }
fn parse_variable_ref(pair: Pair<Rule>) -> VariableRef {
    let mut inner = pair.into_inner();
    let var = parse_variable_name(inner.next().unwrap());
    let index = inner.next().map(|index| {
        Box::new(parse_expression(index.into_inner().next().unwrap()))
    });
    VariableRef {
        name: var.name,
        order: var.order,
        index,
    }
}

// unit_type      =  { unit_factor ~ (unit_mul_op ~ unit_factor)* }
// unit_factor    =  { unit_base ~ ("**" ~ unit_exponent)? }
fn parse_unit(pair: Pair<Rule>) -> UnitExpr {
    match pair.as_rule() {
        Rule::unit_type => {
            let mut inner = pair.into_inner();
            let mut head = parse_unit(inner.next().unwrap());
            while let Some(op) = inner.next() {
                let rhs = parse_unit(inner.next().unwrap());
                head = match op.as_str() {
                    "*" => UnitExpr::Mul(Box::new(head), Box::new(rhs)),
                    _ => UnitExpr::Div(Box::new(head), Box::new(rhs)),
                };
            }
            head
        }
        Rule::unit_factor => {
            let mut inner = pair.into_inner();
            let base = parse_unit(inner.next().unwrap());
            match inner.next() {
                Some(exponent) => UnitExpr::Pow(Box::new(base), exponent.as_str().parse().unwrap()),
                None => base,
            }
        }
        Rule::unit_one => UnitExpr::One,
        Rule::unit_name => UnitExpr::Name(pair.as_str().to_string()),
        _ => unreachable!("{:?}", pair.to_string()),
    }
}

// datatype       =  { primitive_type | unit_type }
fn parse_datatype(pair: Pair<Rule>) -> DataType {
    let span = span_of(&pair);
    let inner = pair.into_inner().next().unwrap();
    let kind = match inner.as_rule() {
        Rule::primitive_type => match inner.as_str() {
            "integer" => DataTypeKind::Integer,
            "real" => DataTypeKind::Real,
            "boolean" => DataTypeKind::Boolean,
            "string" => DataTypeKind::String,
            _ => DataTypeKind::Void,
        },
        _ => DataTypeKind::Unit(parse_unit(inner)),
    };
    DataType { kind, span }
}

// size_param  =  { "[" ~ (integer_size | name) ~ "]" }
fn parse_size(pair: Pair<Rule>) -> String {
    pair.into_inner().next().unwrap().as_str().to_string()
}

// declaration = { recordable? ~ alias? ~ variable_name ~ ("," ~ variable_name)* ~ datatype
//                 ~ size_param? ~ ("=" ~ expression)? ~ invariant? }
fn parse_declaration(pair: Pair<Rule>) -> Declaration {
    let span = span_of(&pair);
    let mut decl = Declaration {
        names: vec![],
        datatype: DataType::new(DataTypeKind::Real),
        size: None,
        expr: None,
        invariant: None,
        is_alias: false,
        is_recordable: false,
        span,
    };
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::recordable => decl.is_recordable = true,
            Rule::alias => decl.is_alias = true,
            Rule::variable_name => decl.names.push(parse_variable_name(inner)),
            Rule::datatype => decl.datatype = parse_datatype(inner),
            Rule::size_param => decl.size = Some(parse_size(inner)),
            Rule::expression => decl.expr = Some(parse_expression(inner)),
            Rule::invariant => {
                decl.invariant = Some(parse_expression(inner.into_inner().next().unwrap()))
            }
            _ => unreachable!("{:?}", inner.to_string()),
        }
    }
    decl
}

// block       = { (stmt ~ nl)* }
fn parse_block(pair: Pair<Rule>) -> Block {
    let span = span_of(&pair);
    Block {
        stmts: pair.into_inner().map(parse_stmt).collect(),
        scope: None,
        span,
    }
}

fn parse_stmt(pair: Pair<Rule>) -> Stmt {
    let span = span_of(&pair);
    let kind = match pair.as_rule() {
        Rule::declaration => StmtKind::Declaration(parse_declaration(pair)),

        // assignment  = { variable ~ assign_op ~ expression }
        Rule::assignment => {
            let mut inner = pair.into_inner();
            let target = parse_variable_ref(inner.next().unwrap());
            let op = match inner.next().unwrap().as_str() {
                "+=" => AssignOp::Add,
                "-=" => AssignOp::Sub,
                "*=" => AssignOp::Mul,
                "/=" => AssignOp::Div,
                _ => AssignOp::Assign,
            };
            let expr = parse_expression(inner.next().unwrap());
            StmtKind::Assignment { target, op, expr }
        }

        // call_stmt   = { call ~ &(NEWLINE | EOI) }
        Rule::call_stmt => StmtKind::Call(parse_expression(pair.into_inner().next().unwrap())),

        // return_stmt = { kw_return ~ expression? }
        Rule::return_stmt => StmtKind::Return(pair.into_inner().next().map(parse_expression)),

        // if_stmt     = { kw_if ~ expression ~ ":" ~ nl ~ block ~ elif_clause* ~ else_clause?
        //                 ~ kw_end }
        // elif_clause = { kw_elif ~ expression ~ ":" ~ nl ~ block }
        // else_clause = { kw_else ~ ":" ~ nl ~ block }
        Rule::if_stmt => {
            let mut inner = pair.into_inner();
            let cond = parse_expression(inner.next().unwrap());
            let block = parse_block(inner.next().unwrap());
            let mut branches = vec![(cond, block)];
            let mut otherwise = None;
            for clause in inner {
                match clause.as_rule() {
                    Rule::elif_clause => {
                        let mut clause = clause.into_inner();
                        let cond = parse_expression(clause.next().unwrap());
                        let block = parse_block(clause.next().unwrap());
                        branches.push((cond, block));
                    }
                    _ => otherwise = Some(parse_block(clause.into_inner().next().unwrap())),
                }
            }
            StmtKind::If {
                branches,
                otherwise,
            }
        }

        // for_stmt    = { kw_for ~ name ~ kw_in ~ expression ~ "..." ~ expression
        //                 ~ (kw_step ~ signed_number)? ~ ":" ~ nl ~ block ~ kw_end }
        Rule::for_stmt => {
            let mut inner = pair.into_inner();
            let var = parse_name(inner.next().unwrap());
            let from = parse_expression(inner.next().unwrap());
            let to = parse_expression(inner.next().unwrap());
            let mut step = 1.0;
            let mut body = None;
            for rest in inner {
                match rest.as_rule() {
                    Rule::signed_number => step = rest.as_str().parse().unwrap(),
                    _ => body = Some(parse_block(rest)),
                }
            }
            StmtKind::For {
                var,
                from,
                to,
                step,
                body: body.unwrap(),
            }
        }

        // while_stmt  = { kw_while ~ expression ~ ":" ~ nl ~ block ~ kw_end }
        Rule::while_stmt => {
            let mut inner = pair.into_inner();
            let cond = parse_expression(inner.next().unwrap());
            let body = parse_block(inner.next().unwrap());
            StmtKind::While { cond, body }
        }

        _ => unreachable!("{:?}", pair.to_string()),
    };
    Stmt { kind, span }
}

// input_port      = { name ~ size_param? ~ datatype? ~ "<-" ~ input_qualifier* ~ buffer_kind }
fn parse_input_port(pair: Pair<Rule>) -> InputPort {
    let span = span_of(&pair);
    let mut inner = pair.into_inner();
    let mut port = InputPort {
        name: parse_name(inner.next().unwrap()),
        size: None,
        datatype: None,
        qualifiers: vec![],
        kind: BufferKind::Spike,
        span,
    };
    for rest in inner {
        match rest.as_rule() {
            Rule::size_param => port.size = Some(parse_size(rest)),
            Rule::datatype => port.datatype = Some(parse_datatype(rest)),
            Rule::input_qualifier => port.qualifiers.push(match rest.as_str() {
                "inhibitory" => InputQualifier::Inhibitory,
                _ => InputQualifier::Excitatory,
            }),
            Rule::buffer_kind => port.kind = parse_buffer_kind(rest),
            _ => unreachable!("{:?}", rest.to_string()),
        }
    }
    port
}

// buffer_kind     = @{ ("spike" | "current") ~ !ident_char }
fn parse_buffer_kind(pair: Pair<Rule>) -> BufferKind {
    match pair.as_str() {
        "spike" => BufferKind::Spike,
        _ => BufferKind::Current,
    }
}

fn parse_equation_item(pair: Pair<Rule>) -> EquationItem {
    let span = span_of(&pair);
    match pair.as_rule() {
        // shape_decl      = { kw_shape ~ variable_name ~ "=" ~ expression }
        Rule::shape_decl => {
            let mut inner = pair.into_inner();
            let lhs = parse_variable_name(inner.next().unwrap());
            let rhs = parse_expression(inner.next().unwrap());
            EquationItem::Shape(ShapeDecl { lhs, rhs, span })
        }
        // ode_equation    = { variable_name ~ "=" ~ !"=" ~ expression }
        Rule::ode_equation => {
            let mut inner = pair.into_inner();
            let lhs = parse_variable_name(inner.next().unwrap());
            let rhs = parse_expression(inner.next().unwrap());
            EquationItem::Ode(OdeEquation { lhs, rhs, span })
        }
        _ => EquationItem::Alias(parse_declaration(pair)),
    }
}

fn parse_body_element(pair: Pair<Rule>) -> BodyElement {
    let span = span_of(&pair);
    match pair.as_rule() {
        // var_block      = { var_block_kind ~ ":" ~ nl ~ (declaration ~ nl)* ~ kw_end ~ nl }
        Rule::var_block => {
            let mut inner = pair.into_inner();
            let kind = match inner.next().unwrap().as_str() {
                "parameters" => VarBlockKind::Parameters,
                "internals" => VarBlockKind::Internals,
                _ => VarBlockKind::State,
            };
            BodyElement::Variables(VarBlock {
                kind,
                declarations: inner.map(parse_declaration).collect(),
                span,
            })
        }

        // equations_block = { kw_equations ~ ":" ~ nl ~ (equation_item ~ nl)* ~ kw_end ~ nl }
        Rule::equations_block => BodyElement::Equations(EquationsBlock {
            items: pair.into_inner().map(parse_equation_item).collect(),
            span,
        }),

        // input_block     = { kw_input ~ ":" ~ nl ~ (input_port ~ nl)* ~ kw_end ~ nl }
        Rule::input_block => BodyElement::Input(InputBlock {
            ports: pair.into_inner().map(parse_input_port).collect(),
            span,
        }),

        // output_block    = { kw_output ~ ":" ~ buffer_kind ~ nl }
        Rule::output_block => BodyElement::Output(OutputBlock {
            kind: parse_buffer_kind(pair.into_inner().next().unwrap()),
            span,
        }),

        // update_block    = { kw_update ~ ":" ~ nl ~ block ~ kw_end ~ nl }
        Rule::update_block => BodyElement::Update(UpdateBlock {
            block: parse_block(pair.into_inner().next().unwrap()),
            span,
        }),

        // function_def    = { kw_function ~ name ~ "(" ~ (param ~ ("," ~ param)*)? ~ ")"
        //                     ~ datatype? ~ ":" ~ nl ~ block ~ kw_end ~ nl }
        Rule::function_def => {
            let mut inner = pair.into_inner();
            let name = parse_name(inner.next().unwrap());
            let mut params = vec![];
            let mut return_type = None;
            let mut body = None;
            for rest in inner {
                match rest.as_rule() {
                    // param           = { name ~ datatype }
                    Rule::param => {
                        let param_span = span_of(&rest);
                        let mut param = rest.into_inner();
                        params.push(Param {
                            name: parse_name(param.next().unwrap()),
                            datatype: parse_datatype(param.next().unwrap()),
                            span: param_span,
                        });
                    }
                    Rule::datatype => return_type = Some(parse_datatype(rest)),
                    _ => body = Some(parse_block(rest)),
                }
            }
            BodyElement::Function(FunctionDef {
                name,
                params,
                return_type,
                body: body.unwrap(),
                span,
            })
        }

        _ => unreachable!("{:?}", pair.to_string()),
    }
}

// neuron       =  { kw_neuron ~ name ~ ":" ~ nl ~ body ~ kw_end }
fn parse_model(pair: Pair<Rule>) -> Model {
    let span = span_of(&pair);
    let mut inner = pair.into_inner();
    let name = parse_name(inner.next().unwrap());
    let body = inner
        .next()
        .unwrap()
        .into_inner()
        .map(parse_body_element)
        .collect();
    Model {
        name,
        body,
        scope: None,
        span,
    }
}

fn parse_models(pairs: Pairs<Rule>) -> Vec<Model> {
    pairs
        .filter(|pair| pair.as_rule() == Rule::neuron)
        .map(parse_model)
        .collect()
}

pub fn parse_string(text: &str) -> Result<Vec<Model>, Box<Error<Rule>>> {
    let main = NestmlParser::parse(Rule::main, text)?.next().unwrap();
    Ok(parse_models(main.into_inner()))
}

#[cfg(test)]
mod tests {
    use super::parse_string;
    use crate::ast::{
        BinaryOp, BufferKind, DataTypeKind, EquationItem, ExprKind, StmtKind, UnitExpr,
        VarBlockKind,
    };

    #[test]
    fn empty_neuron() {
        let models = parse_string("neuron empty:\nend\n").unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].name, "empty");
        assert!(models[0].body.is_empty());
    }

    #[test]
    fn blocks_and_declarations() {
        const TEXT: &str = "
# leaky integrator
neuron iaf:
    state:
        recordable V_m mV = E_L  # membrane potential
        r integer = 0
    end

    parameters:
        E_L mV = -70 mV
        tau_m ms = 10ms [[tau_m > 0 ms]]
        C_m pF = 250.0 pF
        w real [3] = 1.0
    end

    internals:
        h ms = resolution()
        P nS/ms**2 = 1 nS / (1 ms * ms)
    end

    equations:
        function I_syn pA = 0 pA
        V_m' = -(V_m - E_L) / tau_m + I_syn / C_m
    end

    input:
        spikes nS <- inhibitory excitatory spike
        I_stim pA <- current
    end

    output: spike

    update:
        integrate_odes()
    end
end
";
        let models = parse_string(TEXT).unwrap();
        let model = &models[0];
        assert_eq!(model.name, "iaf");
        assert_eq!(model.body.len(), 7);

        let state: Vec<_> = model.declarations_of(VarBlockKind::State).collect();
        assert_eq!(state.len(), 2);
        assert!(state[0].is_recordable);
        assert_eq!(state[0].names[0].name, "V_m");
        assert_eq!(state[1].datatype.kind, DataTypeKind::Integer);

        let params: Vec<_> = model.declarations_of(VarBlockKind::Parameters).collect();
        assert_eq!(params.len(), 4);
        assert_eq!(params[0].expr.as_ref().unwrap().to_string(), "-(70 * mV)");
        assert_eq!(params[1].expr.as_ref().unwrap().to_string(), "10 * ms");
        assert!(params[1].invariant.is_some());
        assert_eq!(params[3].size.as_deref(), Some("3"));

        let internals: Vec<_> = model.declarations_of(VarBlockKind::Internals).collect();
        assert_eq!(
            internals[1].datatype.kind,
            DataTypeKind::Unit(UnitExpr::Div(
                Box::new(UnitExpr::Name("nS".to_string())),
                Box::new(UnitExpr::Pow(Box::new(UnitExpr::Name("ms".to_string())), 2))
            ))
        );

        let items: Vec<_> = model.equation_items().collect();
        assert!(matches!(items[0], EquationItem::Alias(decl) if decl.is_alias));
        match items[1] {
            EquationItem::Ode(ode) => {
                assert_eq!(ode.lhs.full_name(), "V_m'");
                assert_eq!(
                    ode.rhs.to_string(),
                    "-(V_m - E_L) / tau_m + I_syn / C_m"
                );
            }
            _ => panic!("expected an ode"),
        }

        let ports: Vec<_> = model.input_ports().collect();
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].qualifiers.len(), 2);
        assert_eq!(ports[1].kind, BufferKind::Current);
        assert_eq!(model.outputs().next().unwrap().kind, BufferKind::Spike);
        let update = model.update_blocks().next().unwrap();
        assert!(matches!(update.block.stmts[0].kind, StmtKind::Call(_)));
    }

    #[test]
    fn shapes_and_derivatives() {
        const TEXT: &str = "
neuron alpha:
    equations:
        shape g_in = (e / tau) * t * exp(-t / tau)
        shape g_ex'' = -g_ex' / tau
        shape g_ex' = g_ex' - g_ex / tau
        V_m'' = -V_m' / tau + convolve(g_ex, spikes)
    end
end
";
        let model = &parse_string(TEXT).unwrap()[0];
        let shapes: Vec<_> = model.shapes().collect();
        assert_eq!(shapes.len(), 3);
        assert_eq!(shapes[0].lhs.order, 0);
        assert_eq!(shapes[1].lhs.order, 2);
        assert_eq!(shapes[2].rhs.to_string(), "g_ex' - g_ex / tau");
        let ode = model.odes().next().unwrap();
        assert_eq!(ode.lhs.order, 2);
        assert_eq!(ode.rhs.to_string(), "-V_m' / tau + convolve(g_ex, spikes)");
    }

    #[test]
    fn statements() {
        const TEXT: &str = "
neuron control:
    update:
        x real = 0
        if x > 1 and not y:
            x += 2
        elif x == 1:
            x = x ** 2 ** 3
        else:
            x = cond ? 1 : 2
        end
        for i in 0 ... 10 step 2:
            x -= i % 3
        end
        while x < 10:
            x *= 2
        end
        returned integer = 3
    end

    function f(a mV, b ms) mV/ms:
        return a / b
    end
end
";
        let model = &parse_string(TEXT).unwrap()[0];
        let update = model.update_blocks().next().unwrap();
        let stmts = &update.block.stmts;
        assert_eq!(stmts.len(), 5);
        match &stmts[1].kind {
            StmtKind::If {
                branches,
                otherwise,
            } => {
                assert_eq!(branches.len(), 2);
                assert_eq!(branches[0].0.to_string(), "x > 1 and not y");
                assert!(otherwise.is_some());
                match &branches[1].1.stmts[0].kind {
                    StmtKind::Assignment { expr, .. } => match &expr.kind {
                        ExprKind::Binary { op, rhs, .. } => {
                            assert_eq!(*op, BinaryOp::Pow);
                            assert!(matches!(
                                rhs.kind,
                                ExprKind::Binary {
                                    op: BinaryOp::Pow,
                                    ..
                                }
                            ));
                        }
                        _ => panic!("expected a power"),
                    },
                    _ => panic!("expected an assignment"),
                }
            }
            _ => panic!("expected an if statement"),
        }
        match &stmts[2].kind {
            StmtKind::For { var, step, .. } => {
                assert_eq!(var, "i");
                assert_eq!(*step, 2.0);
            }
            _ => panic!("expected a for loop"),
        }
        assert!(matches!(stmts[4].kind, StmtKind::Declaration(_)));
        let func = model.functions().next().unwrap();
        assert_eq!(func.params.len(), 2);
        assert!(func.return_type.is_some());
        assert!(matches!(func.body.stmts[0].kind, StmtKind::Return(Some(_))));
    }

    #[test]
    fn syntax_error_is_reported() {
        let err = parse_string("neuron broken:\n  state:\n    V mV = \n  end\nend\n");
        assert!(err.is_err());
    }
}
